// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::pending_task::TaskKey;
use crate::{Task, TaskQueueId, TimePoint, Wakeable};

/// Identifies a task observer within one queue.
pub type TaskObserverKey = usize;

/// A callback invoked after a message loop has run a batch of tasks.
pub type TaskObserver = Arc<dyn Fn() + Send + Sync + 'static>;

/// State of a single task queue. Only ever touched with the registry lock held.
pub(crate) struct TaskQueueEntry {
    /// Pending tasks in the order in which they will run.
    ///
    /// Tasks always stay in the queue they were registered into, even while that queue is
    /// merged into another one. Merging only changes who looks at them.
    delayed_tasks: BTreeMap<TaskKey, Task>,

    /// Notification order is insertion order, so this is a list and not a map.
    task_observers: Vec<(TaskObserverKey, TaskObserver)>,

    /// Non-owning. The run loop drops its end when it goes away and we silently stop calling it.
    wakeable: Option<Weak<dyn Wakeable>>,

    /// The queue this one is merged into, or `UNMERGED`.
    subsumed_by: TaskQueueId,

    /// The queues merged into this one.
    owner_of: BTreeSet<TaskQueueId>,
}

impl TaskQueueEntry {
    pub fn new() -> Self {
        Self {
            delayed_tasks: BTreeMap::new(),
            task_observers: Vec::new(),
            wakeable: None,
            subsumed_by: TaskQueueId::UNMERGED,
            owner_of: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.delayed_tasks.len()
    }

    pub fn push(&mut self, key: TaskKey, task: Task) {
        self.delayed_tasks.insert(key, task);
    }

    /// The key of the task that would run first, if any.
    pub fn head(&self) -> Option<TaskKey> {
        self.delayed_tasks.keys().next().copied()
    }

    /// The key of the first task allowed to run at `now`.
    ///
    /// That is the head if it is due. Otherwise it is the earliest task targeting
    /// [`TimePoint::max()`], which is eligible no matter how far away the head is.
    pub fn first_runnable(&self, now: TimePoint) -> Option<TaskKey> {
        let head = self.head()?;

        if head.is_runnable_at(now) {
            return Some(head);
        }

        self.delayed_tasks
            .range(TaskKey::first_at(TimePoint::max())..)
            .next()
            .map(|(key, _)| *key)
    }

    pub fn pop(&mut self, key: TaskKey) -> Option<Task> {
        self.delayed_tasks.remove(&key)
    }

    /// Removes all pending tasks and hands them to the caller, who decides where they are dropped.
    pub fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.delayed_tasks).into_values().collect()
    }

    /// Adds an observer, replacing the closure of an existing observer with the same key in place.
    pub fn add_observer(&mut self, key: TaskObserverKey, observer: TaskObserver) -> Option<TaskObserver> {
        match self.task_observers.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, observer)),
            None => {
                self.task_observers.push((key, observer));
                None
            }
        }
    }

    pub fn remove_observer(&mut self, key: TaskObserverKey) -> Option<TaskObserver> {
        let index = self.task_observers.iter().position(|(existing, _)| *existing == key)?;
        Some(self.task_observers.remove(index).1)
    }

    pub fn observers(&self) -> impl Iterator<Item = &TaskObserver> {
        self.task_observers.iter().map(|(_, observer)| observer)
    }

    pub fn set_wakeable(&mut self, wakeable: Option<Weak<dyn Wakeable>>) {
        self.wakeable = wakeable;
    }

    /// Upgrades the installed wakeable, if it is still alive.
    pub fn wakeable(&self) -> Option<Arc<dyn Wakeable>> {
        self.wakeable.as_ref().and_then(Weak::upgrade)
    }

    pub const fn subsumed_by(&self) -> TaskQueueId {
        self.subsumed_by
    }

    pub fn set_subsumed_by(&mut self, owner: TaskQueueId) {
        self.subsumed_by = owner;
    }

    pub const fn is_subsumed(&self) -> bool {
        !self.subsumed_by.is_unmerged()
    }

    pub const fn owner_of(&self) -> &BTreeSet<TaskQueueId> {
        &self.owner_of
    }

    pub fn owner_of_mut(&mut self) -> &mut BTreeSet<TaskQueueId> {
        &mut self.owner_of
    }
}

impl fmt::Debug for TaskQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueueEntry")
            .field("pending_tasks", &self.delayed_tasks.len())
            .field("task_observers", &self.task_observers.len())
            .field("has_wakeable", &self.wakeable.is_some())
            .field("subsumed_by", &self.subsumed_by)
            .field("owner_of", &self.owner_of)
            .finish()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn key(ticks: i64, order: u64) -> TaskKey {
        TaskKey::new(TimePoint::from_ticks(ticks), order)
    }

    #[test]
    fn head_is_earliest_task() {
        let mut entry = TaskQueueEntry::new();
        entry.push(key(30, 0), Box::new(|| {}));
        entry.push(key(10, 1), Box::new(|| {}));
        entry.push(key(10, 2), Box::new(|| {}));

        assert_eq!(entry.head(), Some(key(10, 1)));
        assert_eq!(entry.len(), 3);
    }

    #[test]
    fn first_runnable_skips_future_tasks_but_not_max() {
        let mut entry = TaskQueueEntry::new();
        entry.push(key(50, 0), Box::new(|| {}));

        assert_eq!(entry.first_runnable(TimePoint::from_ticks(10)), None);

        entry.push(TaskKey::new(TimePoint::max(), 1), Box::new(|| {}));

        assert_eq!(
            entry.first_runnable(TimePoint::from_ticks(10)),
            Some(TaskKey::new(TimePoint::max(), 1))
        );
        assert_eq!(entry.first_runnable(TimePoint::from_ticks(50)), Some(key(50, 0)));
    }

    #[test]
    fn take_tasks_empties_the_queue() {
        let mut entry = TaskQueueEntry::new();
        entry.push(key(1, 0), Box::new(|| {}));
        entry.push(key(2, 1), Box::new(|| {}));

        assert_eq!(entry.take_tasks().len(), 2);
        assert_eq!(entry.len(), 0);
        assert_eq!(entry.head(), None);
    }

    #[test]
    fn readding_observer_keeps_its_position() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut entry = TaskQueueEntry::new();

        entry.add_observer(1, Arc::new(|| {}));
        entry.add_observer(2, Arc::new(|| {}));

        let calls_clone = Arc::clone(&calls);
        let replaced = entry.add_observer(
            1,
            Arc::new(move || {
                calls_clone.fetch_add(1, Ordering::Relaxed);
            }),
        );
        assert!(replaced.is_some());

        let observers: Vec<_> = entry.observers().cloned().collect();
        assert_eq!(observers.len(), 2);

        observers[0]();
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        assert!(entry.remove_observer(1).is_some());
        assert!(entry.remove_observer(1).is_none());
        assert_eq!(entry.observers().count(), 1);
    }

    #[test]
    fn dropped_wakeable_is_not_returned() {
        struct Nothing;

        impl Wakeable for Nothing {
            fn wake_up(&self, _time_point: TimePoint, _is_woken_by_vsync: bool) {}
        }

        let wakeable = Arc::new(Nothing);
        let mut entry = TaskQueueEntry::new();
        entry.set_wakeable(Some(Arc::downgrade(&wakeable) as Weak<dyn Wakeable>));

        assert!(entry.wakeable().is_some());

        drop(wakeable);
        assert!(entry.wakeable().is_none());
    }

    #[test]
    fn new_entry_is_unmerged() {
        let entry = TaskQueueEntry::new();

        assert!(!entry.is_subsumed());
        assert_eq!(entry.subsumed_by(), TaskQueueId::UNMERGED);
        assert!(entry.owner_of().is_empty());
    }
}
