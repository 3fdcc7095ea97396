// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers shared by the unit tests of this crate.

use parking_lot::Mutex;

use crate::{MessageLoopTaskQueues, PendingTask, TaskQueueId, TimePoint, Wakeable};

/// Pops every task that may run at `now`, in the order a loop would run them.
pub fn drain(task_queues: &MessageLoopTaskQueues, queue_ids: &[TaskQueueId], now: TimePoint) -> Vec<PendingTask> {
    std::iter::from_fn(|| task_queues.get_next_task_to_run(queue_ids, now)).collect()
}

/// A wakeable that remembers every deadline it was woken with.
#[derive(Debug, Default)]
pub struct RecordingWakeable {
    wakes: Mutex<Vec<TimePoint>>,
}

impl RecordingWakeable {
    pub fn wakes(&self) -> Vec<TimePoint> {
        self.wakes.lock().clone()
    }
}

impl Wakeable for RecordingWakeable {
    fn wake_up(&self, time_point: TimePoint, _is_woken_by_vsync: bool) {
        self.wakes.lock().push(time_point);
    }
}
