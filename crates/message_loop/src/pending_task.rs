// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::{TaskQueueId, TimePoint};

/// A unit of work that can be posted to a task queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Orders pending tasks: earliest target time first, registration order among equals.
///
/// `order` is unique across the whole registry, so keys never collide even when tasks of
/// different queues are compared with each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TaskKey {
    target_time: TimePoint,
    order: u64,
}

impl TaskKey {
    pub const fn new(target_time: TimePoint, order: u64) -> Self {
        Self { target_time, order }
    }

    /// The smallest key with the given target time.
    pub const fn first_at(target_time: TimePoint) -> Self {
        Self { target_time, order: 0 }
    }

    pub const fn target_time(&self) -> TimePoint {
        self.target_time
    }

    pub const fn order(&self) -> u64 {
        self.order
    }

    /// Whether a task with this key may run at `now`.
    ///
    /// Tasks targeting [`TimePoint::max()`] are always eligible; they sort after every task with
    /// a finite target time, so they only run once nothing more urgent is due.
    pub fn is_runnable_at(&self, now: TimePoint) -> bool {
        self.target_time <= now || self.target_time.is_max()
    }
}

/// A task popped from a queue by
/// [`MessageLoopTaskQueues::get_next_task_to_run()`][crate::MessageLoopTaskQueues::get_next_task_to_run].
pub struct PendingTask {
    key: TaskKey,
    queue_id: TaskQueueId,
    task: Task,
}

impl PendingTask {
    pub(crate) fn new(key: TaskKey, queue_id: TaskQueueId, task: Task) -> Self {
        Self { key, queue_id, task }
    }

    /// Registry-wide registration sequence number of the task.
    #[must_use]
    pub const fn order(&self) -> u64 {
        self.key.order()
    }

    /// The earliest time the task was allowed to run.
    #[must_use]
    pub const fn target_time(&self) -> TimePoint {
        self.key.target_time()
    }

    /// The queue the task was registered into. For a task popped through a merged queue this
    /// is the merged-in queue, not the owner that popped it.
    #[must_use]
    pub const fn queue_id(&self) -> TaskQueueId {
        self.queue_id
    }

    /// Runs the task on the calling thread.
    pub fn run(self) {
        (self.task)();
    }

    /// Unwraps the closure without running it.
    #[must_use]
    pub fn into_task(self) -> Task {
        self.task
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("order", &self.key.order())
            .field("target_time", &self.key.target_time())
            .field("queue_id", &self.queue_id)
            .finish_non_exhaustive()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimeDelta;

    #[test]
    fn keys_order_by_time_then_registration() {
        let early = TimePoint::from_ticks(10);
        let late = early + TimeDelta::from_nanoseconds(1);

        assert!(TaskKey::new(early, 5) < TaskKey::new(late, 1));
        assert!(TaskKey::new(early, 1) < TaskKey::new(early, 2));
        assert!(TaskKey::first_at(late) <= TaskKey::new(late, 0));
    }

    #[test]
    fn max_target_time_is_always_runnable() {
        let now = TimePoint::from_ticks(100);

        assert!(TaskKey::new(TimePoint::from_ticks(100), 0).is_runnable_at(now));
        assert!(!TaskKey::new(TimePoint::from_ticks(101), 0).is_runnable_at(now));
        assert!(TaskKey::new(TimePoint::max(), 0).is_runnable_at(now));
    }

    #[test]
    fn debug_omits_closure() {
        let task = PendingTask::new(
            TaskKey::new(TimePoint::from_ticks(3), 9),
            TaskQueueId::new(1),
            Box::new(|| {}),
        );

        let text = format!("{task:?}");
        assert!(text.contains("order: 9"));
        assert!(text.contains(".."));
    }
}
