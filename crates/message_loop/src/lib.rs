// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Mergeable, time-ordered task queues and the run loops that drain them.
//!
//! Every thread of an engine hosts a [`MessageLoop`] that services one task queue in a shared
//! [`MessageLoopTaskQueues`] registry. Any thread can register tasks into any queue; tasks run on
//! the thread of the loop servicing the queue, earliest target time first and in registration
//! order among equal target times.
//!
//! Queues can be [merged][MessageLoopTaskQueues::merge] so that the loop of one queue runs the
//! tasks of another, for example to run two logical engine threads on the same physical thread
//! for a while. [Unmerging][MessageLoopTaskQueues::unmerge] hands every task that has not run yet
//! back to its own loop, in its original order.
//!
//! # Example
//!
//! ```
//! use message_loop::{MessageLoopTaskQueues, Thread, TimeDelta};
//!
//! let task_queues = MessageLoopTaskQueues::new();
//! let ui = Thread::new("ui", &task_queues)?;
//! let raster = Thread::new("raster", &task_queues)?;
//!
//! // From now on, tasks posted to the raster thread run on the ui thread.
//! assert!(task_queues.merge(ui.task_runner().queue_id(), raster.task_runner().queue_id()));
//!
//! raster.task_runner().post_delayed_task(|| println!("hello from ui"), TimeDelta::from_milliseconds(5));
//! # Ok::<(), message_loop::Error>(())
//! ```
//!
//! # Wake-ups
//!
//! The registry tells a loop about new work through the [`Wakeable`] trait, but only when a
//! registration or merge moves the loop's earliest deadline closer. A loop that is already armed
//! for an earlier deadline is left alone.

mod error;
mod message_loop;
mod pending_task;
mod sync;
mod task_queue;
mod task_queue_id;
mod task_queues;
mod task_runner;
mod thread;
mod time;
mod wakeable;

#[cfg(test)]
mod test_util;

pub use error::{Error, Result};
pub use message_loop::{MessageLoop, MessageLoopBuilder, TaskPanic, TaskPanicHandler};
pub use pending_task::{PendingTask, Task};
pub use sync::{AutoResetWaitableEvent, CountDownLatch};
pub use task_queue::{TaskObserver, TaskObserverKey};
pub use task_queue_id::TaskQueueId;
pub use task_queues::MessageLoopTaskQueues;
pub use task_runner::TaskRunner;
pub use thread::Thread;
pub use time::{TimeDelta, TimePoint};
pub use wakeable::Wakeable;
