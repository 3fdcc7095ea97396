// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::TimePoint;

/// Receives "wake up at this time" requests for a task queue.
///
/// A run loop installs itself as the wakeable of its queue through
/// [`MessageLoopTaskQueues::set_wakeable()`][crate::MessageLoopTaskQueues::set_wakeable]. The
/// registry calls [`wake_up()`][Self::wake_up] whenever a registration or merge moves the
/// earliest pending task of the queue closer, passing the new earliest target time.
///
/// # Thread safety
///
/// Calls arrive on whichever thread registered the task. They are made while the registry holds
/// its internal lock, so implementations must return quickly and must not call back into the
/// registry.
#[cfg_attr(test, mockall::automock)]
pub trait Wakeable: Send + Sync {
    /// Requests that the owner of the queue is awake no later than `time_point`.
    ///
    /// [`TimePoint::max()`] carries no deadline and may be ignored.
    fn wake_up(&self, time_point: TimePoint, is_woken_by_vsync: bool);
}
