// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::{MessageLoop, MessageLoopTaskQueues, Result, TaskRunner};

/// A named operating system thread running a [`MessageLoop`].
///
/// Dropping the thread terminates its loop and waits for the thread to exit.
pub struct Thread {
    message_loop: MessageLoop,
    join_handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Starts a thread named `name` running a new message loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StdIo`][crate::Error::StdIo] if the operating system refuses to start
    /// the thread.
    pub fn new(name: impl Into<String>, task_queues: &Arc<MessageLoopTaskQueues>) -> Result<Self> {
        MessageLoop::builder(task_queues).name(name).spawn()
    }

    pub(crate) fn start(message_loop: MessageLoop, name: Option<String>, stack_size: Option<usize>) -> Result<Self> {
        let mut builder = thread::Builder::new();

        if let Some(name) = name {
            builder = builder.name(name);
        }

        if let Some(stack_size) = stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_loop = message_loop.clone();
        let join_handle = builder.spawn(move || {
            if let Err(e) = thread_loop.run() {
                error!(queue_id = %thread_loop.queue_id(), error = %e, "message loop failed");
            }
        })?;

        debug!(queue_id = %message_loop.queue_id(), name = message_loop.name(), "message loop thread started");

        Ok(Self {
            message_loop,
            join_handle: Some(join_handle),
        })
    }

    /// A task runner posting to the thread's loop.
    #[must_use]
    pub fn task_runner(&self) -> TaskRunner {
        self.message_loop.task_runner()
    }

    /// The loop running on the thread.
    #[must_use]
    pub const fn message_loop(&self) -> &MessageLoop {
        &self.message_loop
    }

    /// Terminates the loop and waits for the thread to exit.
    pub fn join(mut self) {
        self.terminate_and_join();
    }

    fn terminate_and_join(&mut self) {
        let Some(join_handle) = self.join_handle.take() else {
            return;
        };

        self.message_loop.terminate();

        if join_handle.thread().id() == thread::current().id() {
            // Dropped by one of its own tasks. The loop exits once the task returns.
            debug!(queue_id = %self.message_loop.queue_id(), "message loop thread detached from itself");
            return;
        }

        if join_handle.join().is_err() {
            error!(queue_id = %self.message_loop.queue_id(), "message loop thread panicked");
        }

        debug!(queue_id = %self.message_loop.queue_id(), "message loop thread joined");
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.terminate_and_join();
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("message_loop", &self.message_loop)
            .field("joined", &self.join_handle.is_none())
            .finish()
    }
}
