// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// Identifies one task queue owned by a [`MessageLoopTaskQueues`][crate::MessageLoopTaskQueues].
///
/// Identifiers are allocated in increasing order and never reused for the lifetime of the
/// registry that created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskQueueId(u64);

impl TaskQueueId {
    /// Sentinel meaning "no queue". Never assigned to a real queue.
    ///
    /// A queue that is not merged into another queue records this as its owner.
    pub const UNMERGED: Self = Self(u64::MAX);

    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw numeric value of the identifier.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    pub(crate) const fn is_unmerged(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for TaskQueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unmerged() {
            f.write_str("unmerged")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
