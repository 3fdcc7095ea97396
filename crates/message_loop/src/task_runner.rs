// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{MessageLoop, TaskQueueId, TimeDelta, TimePoint};

/// Posts tasks to a [`MessageLoop`] from any thread.
///
/// Task runners are cheap to clone and keep the loop they post to alive.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    message_loop: MessageLoop,
}

impl TaskRunner {
    pub(crate) const fn new(message_loop: MessageLoop) -> Self {
        Self { message_loop }
    }

    /// Runs `task` right away if the calling thread is the one running `runner`'s tasks,
    /// otherwise posts it.
    pub fn run_now_or_post_task(runner: &Self, task: impl FnOnce() + Send + 'static) {
        if runner.runs_tasks_on_current_thread() {
            task();
        } else {
            runner.post_task(task);
        }
    }

    /// Posts a task that may run as soon as the loop gets to it.
    pub fn post_task(&self, task: impl FnOnce() + Send + 'static) {
        self.message_loop.post_task(task, TimePoint::now());
    }

    /// Posts a task that runs no earlier than `delay` from now.
    pub fn post_delayed_task(&self, task: impl FnOnce() + Send + 'static, delay: TimeDelta) {
        self.message_loop.post_task(task, TimePoint::now() + delay);
    }

    /// Posts a task that runs no earlier than `target_time`.
    pub fn post_task_for_time(&self, task: impl FnOnce() + Send + 'static, target_time: TimePoint) {
        self.message_loop.post_task(task, target_time);
    }

    /// Whether the calling thread is the thread this runner's tasks belong to.
    ///
    /// That is the case on the thread of the loop itself, and on either thread of a merged pair:
    /// while two queues are merged, their loops are treated as one logical thread no matter which
    /// side owns the other.
    #[must_use]
    pub fn runs_tasks_on_current_thread(&self) -> bool {
        let Some(current) = MessageLoop::current_task_queue_id() else {
            return false;
        };

        let queue_id = self.queue_id();
        let task_queues = self.message_loop.task_queues();

        current == queue_id || task_queues.owns(current, queue_id) || task_queues.owns(queue_id, current)
    }

    /// The queue this runner posts to.
    #[must_use]
    pub fn queue_id(&self) -> TaskQueueId {
        self.message_loop.queue_id()
    }
}
