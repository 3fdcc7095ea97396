// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::pending_task::TaskKey;
use crate::task_queue::TaskQueueEntry;
use crate::{PendingTask, Task, TaskObserver, TaskObserverKey, TaskQueueId, TimePoint, Wakeable};

/// The registry of all task queues in the process.
///
/// Producers on any thread register tasks into queues; each message loop drains the queue it
/// owns. Queues can be merged so that the tasks of one queue are run by the loop of another,
/// which is how two logical threads of the engine end up sharing one physical thread.
///
/// # Lifecycle
///
/// Create one registry at process start with [`MessageLoopTaskQueues::new()`] and hand the
/// returned `Arc` to every message loop and producer. The registry is meant to live for the
/// rest of the process; there is no teardown.
///
/// # Merging
///
/// Merge topology is a two-level star: a queue merged into another queue cannot itself own
/// merged queues, and an owner cannot be merged into a third queue. Tasks always stay in the
/// queue they were registered into, so unmerging gives every queue back exactly the tasks it
/// still has pending, in their original order.
///
/// # Thread safety
///
/// All operations may be called concurrently from any thread. Each operation is atomic with
/// respect to all others; cross-queue invariants are updated under a single lock.
pub struct MessageLoopTaskQueues {
    queues: Mutex<Queues>,
}

impl MessageLoopTaskQueues {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues::default()),
        })
    }

    /// Creates a new, empty task queue.
    pub fn create_task_queue(&self) -> TaskQueueId {
        self.with_queues(|queues, _| {
            let queue_id = TaskQueueId::new(queues.next_queue_id);
            queues.next_queue_id = queues.next_queue_id.wrapping_add(1);
            queues.entries.insert(queue_id, TaskQueueEntry::new());

            trace!(%queue_id, "task queue created");
            queue_id
        })
    }

    /// Removes a queue. Its pending tasks are dropped without running.
    ///
    /// Queues merged into the disposed queue become independent again. Disposing an unknown or
    /// already disposed queue does nothing.
    pub fn dispose(&self, queue_id: TaskQueueId) {
        self.with_queues(|queues, garbage| {
            let Some(mut entry) = queues.entries.remove(&queue_id) else {
                return;
            };

            garbage.tasks.extend(entry.take_tasks());

            let owner = entry.subsumed_by();
            if let Some(owner_entry) = queues.entries.get_mut(&owner) {
                owner_entry.owner_of_mut().remove(&queue_id);
            }

            for released in std::mem::take(entry.owner_of_mut()) {
                if let Some(released_entry) = queues.entries.get_mut(&released) {
                    released_entry.set_subsumed_by(TaskQueueId::UNMERGED);
                }

                // The released queue may have tasks its own loop has never heard about.
                if let Some(head) = queues.head(released) {
                    queues.wake(released, head.target_time(), garbage);
                }
            }

            debug!(%queue_id, dropped_tasks = garbage.tasks.len(), "task queue disposed");

            // Observers and the wakeable go with the entry.
            garbage.entries.push(entry);
        });
    }

    /// Drops all pending tasks of a queue and of the queues merged into it, keeping the queues.
    pub fn dispose_tasks(&self, queue_id: TaskQueueId) {
        self.with_queues(|queues, garbage| {
            let Some(entry) = queues.entries.get_mut(&queue_id) else {
                warn!(%queue_id, "ignoring request to dispose tasks of an unknown task queue");
                return;
            };

            garbage.tasks.extend(entry.take_tasks());

            let merged: Vec<_> = entry.owner_of().iter().copied().collect();
            for merged_id in merged {
                if let Some(merged_entry) = queues.entries.get_mut(&merged_id) {
                    garbage.tasks.extend(merged_entry.take_tasks());
                }
            }

            debug!(%queue_id, dropped_tasks = garbage.tasks.len(), "pending tasks disposed");
        });
    }

    /// Registers a task to run on the queue no earlier than `target_time`.
    ///
    /// If the task becomes the earliest pending task of the loop servicing the queue (the queue
    /// itself, or the queue it is merged into), that loop's [`Wakeable`] is told about the new
    /// deadline. Registering a task behind the current head wakes nobody.
    ///
    /// Registering into an unknown queue drops the task without running it.
    pub fn register_task(&self, queue_id: TaskQueueId, task: impl FnOnce() + Send + 'static, target_time: TimePoint) {
        self.register_boxed_task(queue_id, Box::new(task), target_time);
    }

    pub(crate) fn register_boxed_task(&self, queue_id: TaskQueueId, task: Task, target_time: TimePoint) {
        self.with_queues(|queues, garbage| {
            let Some(owner) = queues.effective_owner(queue_id) else {
                warn!(%queue_id, "dropping task registered into an unknown task queue");
                garbage.tasks.push(task);
                return;
            };

            let previous_head = queues.head(owner);

            let key = TaskKey::new(target_time, queues.next_order);
            queues.next_order = queues.next_order.wrapping_add(1);

            match queues.entries.get_mut(&queue_id) {
                Some(entry) => entry.push(key, task),
                None => {
                    garbage.tasks.push(task);
                    return;
                }
            }

            trace!(%queue_id, %owner, order = key.order(), "task registered");

            if previous_head.is_none_or(|head| key < head) {
                queues.wake(owner, target_time, garbage);
            }
        });
    }

    /// Counts the pending tasks a loop servicing this queue would see.
    ///
    /// For a queue that owns merged queues this includes their tasks. A queue that is merged
    /// into another one reports zero, since its tasks are accounted for by the owner.
    #[must_use]
    pub fn get_num_pending_tasks(&self, queue_id: TaskQueueId) -> usize {
        let queues = self.queues.lock();

        match queues.entries.get(&queue_id) {
            Some(entry) if !entry.is_subsumed() => queues.merged_set(queue_id).map(|id| queues.len_of(id)).sum(),
            _ => 0,
        }
    }

    /// Whether [`get_num_pending_tasks()`][Self::get_num_pending_tasks] is non-zero.
    #[must_use]
    pub fn has_pending_tasks(&self, queue_id: TaskQueueId) -> bool {
        self.get_num_pending_tasks(queue_id) != 0
    }

    /// Pops the next task that may run at `now` from the given queues and the queues merged
    /// into them.
    ///
    /// Among all eligible tasks, the one with the earliest target time wins, ties going to the
    /// earlier registration. A task is eligible if its target time is not after `now`; tasks
    /// targeting [`TimePoint::max()`] are always eligible but lose to every other eligible task.
    /// Queues in `queue_ids` that are merged into another queue contribute nothing, because the
    /// owner's loop runs their tasks.
    pub fn get_next_task_to_run(&self, queue_ids: &[TaskQueueId], now: TimePoint) -> Option<PendingTask> {
        let mut queues = self.queues.lock();

        let (queue_id, key) = queue_ids
            .iter()
            .copied()
            .filter(|id| queues.entries.get(id).is_some_and(|entry| !entry.is_subsumed()))
            .flat_map(|id| queues.merged_set(id).collect::<Vec<_>>())
            .filter_map(|id| {
                queues
                    .entries
                    .get(&id)
                    .and_then(|entry| entry.first_runnable(now))
                    .map(|key| (id, key))
            })
            .min_by_key(|(_, key)| *key)?;

        let task = queues.entries.get_mut(&queue_id)?.pop(key)?;

        Some(PendingTask::new(key, queue_id, task))
    }

    /// The target time of the task that would run first on a loop servicing this queue.
    ///
    /// Returns `None` if there is nothing pending, or if the queue is merged into another one.
    #[must_use]
    pub fn get_next_wake_time(&self, queue_id: TaskQueueId) -> Option<TimePoint> {
        let queues = self.queues.lock();

        if queues.entries.get(&queue_id)?.is_subsumed() {
            return None;
        }

        queues.head(queue_id).map(|key| key.target_time())
    }

    /// Merges `target` into `owner`: from now on the loop of `owner` runs the tasks of both.
    ///
    /// Returns `false` and changes nothing if the queues are the same, either one is unknown,
    /// either one is already merged into another queue, or `target` itself owns merged queues.
    pub fn merge(&self, owner: TaskQueueId, target: TaskQueueId) -> bool {
        self.with_queues(|queues, garbage| {
            if owner == target || owner.is_unmerged() || target.is_unmerged() {
                return false;
            }

            let (Some(owner_entry), Some(target_entry)) = (queues.entries.get(&owner), queues.entries.get(&target))
            else {
                return false;
            };

            if owner_entry.is_subsumed() || target_entry.is_subsumed() || !target_entry.owner_of().is_empty() {
                debug!(%owner, %target, "rejected merge that would chain task queues");
                return false;
            }

            let previous_head = queues.head(owner);
            let target_head = queues.head(target);

            if let Some(owner_entry) = queues.entries.get_mut(&owner) {
                owner_entry.owner_of_mut().insert(target);
            }
            if let Some(target_entry) = queues.entries.get_mut(&target) {
                target_entry.set_subsumed_by(owner);
            }

            debug!(%owner, %target, "task queues merged");

            if let Some(target_head) = target_head
                && previous_head.is_none_or(|head| target_head < head)
            {
                queues.wake(owner, target_head.target_time(), garbage);
            }

            true
        })
    }

    /// Reverses [`merge()`][Self::merge]. `target` gets its loop back, together with all of its
    /// tasks that have not run yet.
    ///
    /// Returns `false` and changes nothing unless `owner` currently owns `target`.
    pub fn unmerge(&self, owner: TaskQueueId, target: TaskQueueId) -> bool {
        self.with_queues(|queues, garbage| {
            if !queues.owns(owner, target) {
                return false;
            }

            if let Some(owner_entry) = queues.entries.get_mut(&owner) {
                owner_entry.owner_of_mut().remove(&target);
            }
            if let Some(target_entry) = queues.entries.get_mut(&target) {
                target_entry.set_subsumed_by(TaskQueueId::UNMERGED);
            }

            debug!(%owner, %target, "task queues unmerged");

            if let Some(head) = queues.head(target) {
                queues.wake(target, head.target_time(), garbage);
            }

            true
        })
    }

    /// Whether `target` is currently merged into `owner`.
    #[must_use]
    pub fn owns(&self, owner: TaskQueueId, target: TaskQueueId) -> bool {
        self.queues.lock().owns(owner, target)
    }

    /// Whether the queue is currently merged into some other queue.
    #[must_use]
    pub fn is_subsumed(&self, queue_id: TaskQueueId) -> bool {
        self.queues
            .lock()
            .entries
            .get(&queue_id)
            .is_some_and(TaskQueueEntry::is_subsumed)
    }

    /// Installs the wakeable of a queue, replacing any previous one.
    ///
    /// The registry only keeps a weak reference. Once the wakeable is dropped it is no longer
    /// called, so the owner does not need to unregister it explicitly.
    pub fn set_wakeable(&self, queue_id: TaskQueueId, wakeable: Weak<dyn Wakeable>) {
        self.with_queues(|queues, _| match queues.entries.get_mut(&queue_id) {
            Some(entry) => entry.set_wakeable(Some(wakeable)),
            None => warn!(%queue_id, "ignoring wakeable for an unknown task queue"),
        });
    }

    /// Removes the wakeable of a queue, if any.
    pub fn clear_wakeable(&self, queue_id: TaskQueueId) {
        self.with_queues(|queues, _| {
            if let Some(entry) = queues.entries.get_mut(&queue_id) {
                entry.set_wakeable(None);
            }
        });
    }

    /// Adds an observer that the loop servicing the queue calls after each batch of tasks.
    ///
    /// Adding an observer under a key that is already in use replaces the previous closure but
    /// keeps its place in the notification order.
    pub fn add_task_observer(
        &self,
        queue_id: TaskQueueId,
        key: TaskObserverKey,
        observer: impl Fn() + Send + Sync + 'static,
    ) {
        self.with_queues(|queues, garbage| match queues.entries.get_mut(&queue_id) {
            Some(entry) => garbage.observers.extend(entry.add_observer(key, Arc::new(observer))),
            None => warn!(%queue_id, key, "ignoring task observer for an unknown task queue"),
        });
    }

    /// Removes an observer. Returns whether it was present.
    pub fn remove_task_observer(&self, queue_id: TaskQueueId, key: TaskObserverKey) -> bool {
        self.with_queues(|queues, garbage| {
            let removed = queues
                .entries
                .get_mut(&queue_id)
                .and_then(|entry| entry.remove_observer(key));

            let was_present = removed.is_some();
            garbage.observers.extend(removed);
            was_present
        })
    }

    /// Snapshots the observers to call after the loop servicing this queue has run tasks.
    ///
    /// The observers of the queue come first, followed by those of every queue merged into it.
    /// A queue merged into another one returns nothing; the owner's loop notifies its observers.
    /// The snapshot is independent of the registry, so callers may invoke it while other
    /// threads keep using the registry.
    #[must_use]
    pub fn get_observers_to_notify(&self, queue_id: TaskQueueId) -> Vec<TaskObserver> {
        let queues = self.queues.lock();

        match queues.entries.get(&queue_id) {
            Some(entry) if !entry.is_subsumed() => queues
                .merged_set(queue_id)
                .filter_map(|id| queues.entries.get(&id))
                .flat_map(|entry| entry.observers().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Runs `f` with the lock held and drops whatever it discarded after releasing the lock.
    ///
    /// Closures and wakeables may own message loops, whose destructors dispose queues and
    /// therefore need the lock themselves.
    fn with_queues<R>(&self, f: impl FnOnce(&mut Queues, &mut Garbage) -> R) -> R {
        let mut garbage = Garbage::default();

        let result = {
            let mut queues = self.queues.lock();
            f(&mut queues, &mut garbage)
        };

        drop(garbage);
        result
    }
}

impl fmt::Debug for MessageLoopTaskQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.queues.lock();

        f.debug_struct("MessageLoopTaskQueues")
            .field("queues", &queues.entries.len())
            .field("next_queue_id", &queues.next_queue_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Queues {
    entries: HashMap<TaskQueueId, TaskQueueEntry>,
    next_queue_id: u64,

    /// Registration sequence shared by all queues, so that tasks of merged queues interleave in
    /// the order they were registered.
    next_order: u64,
}

impl Queues {
    /// The queue whose loop services `queue_id`, or `None` if the queue does not exist.
    fn effective_owner(&self, queue_id: TaskQueueId) -> Option<TaskQueueId> {
        let entry = self.entries.get(&queue_id)?;

        Some(if entry.is_subsumed() { entry.subsumed_by() } else { queue_id })
    }

    fn owns(&self, owner: TaskQueueId, target: TaskQueueId) -> bool {
        if owner == target || owner.is_unmerged() || target.is_unmerged() {
            return false;
        }

        self.entries
            .get(&target)
            .is_some_and(|entry| entry.subsumed_by() == owner)
    }

    /// The queue itself followed by the queues merged into it.
    fn merged_set(&self, queue_id: TaskQueueId) -> impl Iterator<Item = TaskQueueId> + '_ {
        let merged = self
            .entries
            .get(&queue_id)
            .into_iter()
            .flat_map(|entry| entry.owner_of().iter().copied());

        std::iter::once(queue_id).chain(merged)
    }

    fn len_of(&self, queue_id: TaskQueueId) -> usize {
        self.entries.get(&queue_id).map_or(0, TaskQueueEntry::len)
    }

    /// The earliest pending task across the queue and the queues merged into it.
    fn head(&self, queue_id: TaskQueueId) -> Option<TaskKey> {
        self.merged_set(queue_id)
            .filter_map(|id| self.entries.get(&id).and_then(TaskQueueEntry::head))
            .min()
    }

    /// Calls the wakeable of the queue. The upgraded reference is parked in `garbage` so that
    /// a concurrently dropped loop is destroyed after the lock is released.
    fn wake(&self, queue_id: TaskQueueId, time_point: TimePoint, garbage: &mut Garbage) {
        let Some(wakeable) = self.entries.get(&queue_id).and_then(TaskQueueEntry::wakeable) else {
            return;
        };

        wakeable.wake_up(time_point, false);
        garbage.wakeables.push(wakeable);
    }
}

/// Values removed under the lock whose destructors must run without it.
#[derive(Default)]
struct Garbage {
    entries: Vec<TaskQueueEntry>,
    tasks: Vec<Task>,
    observers: Vec<TaskObserver>,
    wakeables: Vec<Arc<dyn Wakeable>>,
}
