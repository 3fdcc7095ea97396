// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::{
    Error, MessageLoopTaskQueues, PendingTask, Result, TaskObserverKey, TaskQueueId, TaskRunner, Thread, TimePoint,
    Wakeable,
};

thread_local! {
    static CURRENT_LOOP: RefCell<Option<MessageLoop>> = const { RefCell::new(None) };
}

/// Called with the details of every task or task observer that panics on a message loop.
pub type TaskPanicHandler = Arc<dyn Fn(&TaskPanic) + Send + Sync + 'static>;

/// A run loop servicing one task queue on one thread.
///
/// Each message loop owns a queue in the [`MessageLoopTaskQueues`] registry. Calling
/// [`run()`][Self::run] turns the calling thread into the loop's thread: it sleeps until the
/// earliest pending task is due, runs every due task, notifies the task observers and goes back
/// to sleep, until [`terminate()`][Self::terminate] is called from any thread.
///
/// The type is a cheap handle and can be cloned freely. When the last handle is dropped, the
/// queue is disposed and any tasks still pending in it are dropped without running.
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use message_loop::{MessageLoop, MessageLoopTaskQueues, TimePoint};
///
/// let task_queues = MessageLoopTaskQueues::new();
/// let message_loop = MessageLoop::new(&task_queues);
///
/// let terminator = message_loop.clone();
/// message_loop.post_task(move || terminator.terminate(), TimePoint::now());
///
/// thread::spawn(move || message_loop.run()).join().unwrap().unwrap();
/// ```
#[derive(Clone)]
pub struct MessageLoop {
    inner: Arc<LoopInner>,
}

impl MessageLoop {
    /// Creates a message loop with a fresh task queue and the default configuration.
    #[must_use]
    pub fn new(task_queues: &Arc<MessageLoopTaskQueues>) -> Self {
        Self::builder(task_queues).build()
    }

    /// Starts configuring a message loop that will service a fresh queue of `task_queues`.
    #[must_use]
    pub fn builder(task_queues: &Arc<MessageLoopTaskQueues>) -> MessageLoopBuilder {
        MessageLoopBuilder::new(Arc::clone(task_queues))
    }

    /// The message loop bound to the calling thread, creating and binding one if there is none.
    ///
    /// A loop bound this way stays bound until the thread exits. The caller is still
    /// responsible for calling [`run()`][Self::run] on it.
    #[must_use]
    pub fn ensure_initialized_for_current_thread(task_queues: &Arc<MessageLoopTaskQueues>) -> Self {
        if let Some(current) = Self::current() {
            return current;
        }

        let mut builder = Self::builder(task_queues);
        if let Some(name) = std::thread::current().name() {
            builder = builder.name(name);
        }

        let message_loop = builder.build();
        CURRENT_LOOP.with_borrow_mut(|current| *current = Some(message_loop.clone()));

        debug!(queue_id = %message_loop.queue_id(), "message loop bound to current thread");
        message_loop
    }

    /// The message loop bound to the calling thread, if any.
    ///
    /// A loop is bound while it runs on the thread, or for the rest of the thread's life if it
    /// was created by [`ensure_initialized_for_current_thread()`][Self::ensure_initialized_for_current_thread].
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_LOOP.with_borrow(Clone::clone)
    }

    /// The queue of the message loop bound to the calling thread, if any.
    #[must_use]
    pub fn current_task_queue_id() -> Option<TaskQueueId> {
        CURRENT_LOOP.with_borrow(|current| current.as_ref().map(Self::queue_id))
    }

    /// Whether a message loop is bound to the calling thread.
    #[must_use]
    pub fn is_initialized_for_current_thread() -> bool {
        CURRENT_LOOP.with_borrow(Option::is_some)
    }

    /// Runs the loop on the calling thread until [`terminate()`][Self::terminate] is called.
    ///
    /// Returns immediately if the loop has already been terminated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Programming`] if the loop is already running, or if the calling thread is
    /// bound to a different message loop.
    pub fn run(&self) -> Result<()> {
        let _binding = CurrentLoopBinding::bind(self)?;

        {
            let mut state = self.inner.state.lock();

            match state.phase {
                Phase::Created => state.phase = Phase::Running,
                Phase::Running => {
                    return Err(Error::Programming(format!(
                        "message loop of task queue {} is already running",
                        self.inner.queue_id
                    )));
                }
                Phase::Terminated => return Ok(()),
            }
        }

        debug!(queue_id = %self.inner.queue_id, name = self.inner.name(), "message loop started");

        while self.inner.wait_for_wake() {
            self.inner.run_expired_tasks();
            self.inner.rearm();
        }

        debug!(queue_id = %self.inner.queue_id, name = self.inner.name(), "message loop stopped");
        Ok(())
    }

    /// Stops the loop. Safe to call from any thread, including from a task on the loop itself.
    ///
    /// A running loop finishes the task it is currently running and then returns from
    /// [`run()`][Self::run]. Tasks that have not started yet never run. A loop terminated before
    /// it started never runs anything.
    pub fn terminate(&self) {
        let mut state = self.inner.state.lock();

        if state.phase != Phase::Terminated {
            state.phase = Phase::Terminated;
            self.inner.wake_signal.notify_all();

            trace!(queue_id = %self.inner.queue_id, "message loop terminated");
        }
    }

    /// Whether [`terminate()`][Self::terminate] has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Sets the loop's single wake-up timer to `time_point`.
    ///
    /// Unlike wake-ups requested by the registry, this replaces the armed time even if the new
    /// time is later. [`TimePoint::max()`] disarms the timer.
    pub fn wake_up(&self, time_point: TimePoint) {
        let mut state = self.inner.state.lock();
        state.wake_at = time_point;
        self.inner.wake_signal.notify_one();
    }

    /// Registers a task on this loop's queue.
    pub fn post_task(&self, task: impl FnOnce() + Send + 'static, target_time: TimePoint) {
        self.inner.task_queues.register_task(self.inner.queue_id, task, target_time);
    }

    /// Runs every task that is due right now on the calling thread, then notifies the task
    /// observers if any task ran.
    pub fn run_expired_tasks_now(&self) {
        self.inner.run_expired_tasks();
    }

    /// Adds an observer to this loop's queue. See
    /// [`MessageLoopTaskQueues::add_task_observer()`].
    pub fn add_task_observer(&self, key: TaskObserverKey, observer: impl Fn() + Send + Sync + 'static) {
        self.inner.task_queues.add_task_observer(self.inner.queue_id, key, observer);
    }

    /// Removes an observer from this loop's queue. Returns whether it was present.
    pub fn remove_task_observer(&self, key: TaskObserverKey) -> bool {
        self.inner.task_queues.remove_task_observer(self.inner.queue_id, key)
    }

    /// A task runner posting to this loop.
    #[must_use]
    pub fn task_runner(&self) -> TaskRunner {
        TaskRunner::new(self.clone())
    }

    /// The queue serviced by this loop.
    #[must_use]
    pub fn queue_id(&self) -> TaskQueueId {
        self.inner.queue_id
    }

    /// The registry the loop's queue lives in.
    #[must_use]
    pub fn task_queues(&self) -> &Arc<MessageLoopTaskQueues> {
        &self.inner.task_queues
    }

    /// The name given to the loop by its builder, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn armed_wake_time(&self) -> TimePoint {
        self.inner.state.lock().wake_at
    }

    #[cfg(test)]
    pub(crate) fn as_wakeable(&self) -> Arc<dyn Wakeable> {
        Arc::clone(&self.inner) as Arc<dyn Wakeable>
    }
}

impl fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLoop")
            .field("queue_id", &self.inner.queue_id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Configures and creates a [`MessageLoop`].
///
/// Obtained from [`MessageLoop::builder()`].
#[derive(Clone)]
pub struct MessageLoopBuilder {
    task_queues: Arc<MessageLoopTaskQueues>,
    name: Option<String>,
    stack_size: Option<usize>,
    task_panic_handler: Option<TaskPanicHandler>,
}

impl MessageLoopBuilder {
    const fn new(task_queues: Arc<MessageLoopTaskQueues>) -> Self {
        Self {
            task_queues,
            name: None,
            stack_size: None,
            task_panic_handler: None,
        }
    }

    /// Names the loop. The name shows up in log events and is used as the thread name by
    /// [`spawn()`][Self::spawn].
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the stack size of the thread started by [`spawn()`][Self::spawn].
    ///
    /// Has no effect on [`build()`][Self::build].
    #[must_use]
    pub const fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Installs a callback for panics raised by tasks and task observers.
    ///
    /// Panics are always logged. The loop keeps running regardless of whether a handler is set.
    #[must_use]
    pub fn task_panic_handler(mut self, handler: impl Fn(&TaskPanic) + Send + Sync + 'static) -> Self {
        self.task_panic_handler = Some(Arc::new(handler));
        self
    }

    /// Creates the loop and its task queue. The caller runs it with [`MessageLoop::run()`].
    #[must_use]
    pub fn build(self) -> MessageLoop {
        let queue_id = self.task_queues.create_task_queue();

        let inner = Arc::new(LoopInner {
            name: self.name,
            queue_id,
            task_queues: self.task_queues,
            state: Mutex::new(LoopState {
                phase: Phase::Created,
                wake_at: TimePoint::max(),
            }),
            wake_signal: Condvar::new(),
            task_panic_handler: self.task_panic_handler,
        });

        let wakeable: Weak<dyn Wakeable> = Arc::downgrade(&inner) as Weak<dyn Wakeable>;
        inner.task_queues.set_wakeable(queue_id, wakeable);

        trace!(%queue_id, name = inner.name(), "message loop created");

        MessageLoop { inner }
    }

    /// Creates the loop and runs it on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StdIo`] if the operating system refuses to start the thread.
    pub fn spawn(self) -> Result<Thread> {
        let name = self.name.clone();
        let stack_size = self.stack_size;

        Thread::start(self.build(), name, stack_size)
    }
}

impl fmt::Debug for MessageLoopBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLoopBuilder")
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .field("has_task_panic_handler", &self.task_panic_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Describes a task or task observer that panicked on a message loop.
#[derive(Clone, Debug)]
pub struct TaskPanic {
    queue_id: TaskQueueId,
    message: String,
}

impl TaskPanic {
    /// The queue the panicking task was registered into.
    #[must_use]
    pub const fn queue_id(&self) -> TaskQueueId {
        self.queue_id
    }

    /// The panic message, if the payload was a string.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Terminated,
}

#[derive(Debug)]
struct LoopState {
    phase: Phase,

    /// When the loop must next wake up. `TimePoint::max()` means no timer is armed.
    wake_at: TimePoint,
}

struct LoopInner {
    name: Option<String>,
    queue_id: TaskQueueId,
    task_queues: Arc<MessageLoopTaskQueues>,
    state: Mutex<LoopState>,
    wake_signal: Condvar,
    task_panic_handler: Option<TaskPanicHandler>,
}

impl LoopInner {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    fn is_terminated(&self) -> bool {
        self.state.lock().phase == Phase::Terminated
    }

    /// Blocks until the armed wake time has passed. Returns `false` once the loop is terminated.
    #[cfg_attr(test, mutants::skip)] // Mutations hang the loop instead of failing a test.
    fn wait_for_wake(&self) -> bool {
        let mut state = self.state.lock();

        loop {
            if state.phase == Phase::Terminated {
                return false;
            }

            if state.wake_at.is_max() {
                self.wake_signal.wait(&mut state);
                continue;
            }

            let now = TimePoint::now();
            if state.wake_at <= now {
                state.wake_at = TimePoint::max();
                return true;
            }

            let timeout = (state.wake_at - now).to_duration();
            _ = self.wake_signal.wait_for(&mut state, timeout);
        }
    }

    /// Pops and runs every task that is due at the start of the cycle.
    fn run_expired_tasks(&self) {
        let now = TimePoint::now();
        let mut tasks_run: usize = 0;

        while !self.is_terminated() {
            let Some(task) = self.task_queues.get_next_task_to_run(&[self.queue_id], now) else {
                break;
            };

            self.run_task(task);
            tasks_run = tasks_run.saturating_add(1);
        }

        if tasks_run > 0 {
            self.notify_observers();
        }

        trace!(queue_id = %self.queue_id, tasks_run, "drain cycle finished");
    }

    fn run_task(&self, task: PendingTask) {
        let queue_id = task.queue_id();
        let order = task.order();

        // The panic is reported and the task is gone; state it left behind is the task's problem.
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || task.run())) {
            let panic = TaskPanic {
                queue_id,
                message: panic_message(payload.as_ref()),
            };

            error!(%queue_id, order, message = %panic.message, "task panicked");
            self.report_panic(&panic);
        }
    }

    fn notify_observers(&self) {
        for observer in self.task_queues.get_observers_to_notify(self.queue_id) {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer())) {
                let panic = TaskPanic {
                    queue_id: self.queue_id,
                    message: panic_message(payload.as_ref()),
                };

                error!(queue_id = %self.queue_id, message = %panic.message, "task observer panicked");
                self.report_panic(&panic);
            }
        }
    }

    fn report_panic(&self, panic: &TaskPanic) {
        if let Some(handler) = &self.task_panic_handler {
            handler(panic);
        }
    }

    /// Arms the timer for the earliest task that is still pending after a drain cycle.
    fn rearm(&self) {
        if let Some(next_wake_time) = self.task_queues.get_next_wake_time(self.queue_id) {
            self.wake_up(next_wake_time, false);
        }
    }
}

impl Wakeable for LoopInner {
    fn wake_up(&self, time_point: TimePoint, _is_woken_by_vsync: bool) {
        if time_point.is_max() {
            return;
        }

        let mut state = self.state.lock();

        if time_point < state.wake_at {
            state.wake_at = time_point;
            self.wake_signal.notify_one();
        }
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        self.task_queues.dispose(self.queue_id);

        debug!(queue_id = %self.queue_id, name = self.name(), "message loop destroyed");
    }
}

/// Binds a loop to the current thread for the duration of [`MessageLoop::run()`].
struct CurrentLoopBinding {
    bound_here: bool,
}

impl CurrentLoopBinding {
    fn bind(message_loop: &MessageLoop) -> Result<Self> {
        CURRENT_LOOP.with_borrow_mut(|current| {
            if let Some(existing) = current {
                if Arc::ptr_eq(&existing.inner, &message_loop.inner) {
                    return Ok(Self { bound_here: false });
                }

                return Err(Error::Programming(format!(
                    "cannot run the message loop of task queue {} on a thread bound to the message loop of task queue {}",
                    message_loop.queue_id(),
                    existing.queue_id()
                )));
            }

            *current = Some(message_loop.clone());
            Ok(Self { bound_here: true })
        })
    }
}

impl Drop for CurrentLoopBinding {
    fn drop(&mut self) {
        if self.bound_here {
            // Taken out first: dropping the last handle runs destructors that may look at the binding.
            let previous = CURRENT_LOOP.with_borrow_mut(Option::take);
            drop(previous);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload is not a string".to_string()
    }
}
