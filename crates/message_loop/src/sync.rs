// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Blocking rendezvous primitives for coordinating threads around message loops.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Blocks waiters until [`count_down()`][Self::count_down] has been called a fixed number of
/// times.
///
/// A latch created with a count of zero never blocks.
#[derive(Debug)]
pub struct CountDownLatch {
    remaining: Mutex<usize>,
    released: Condvar,
}

impl CountDownLatch {
    /// Creates a latch that opens after `count` calls to [`count_down()`][Self::count_down].
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            released: Condvar::new(),
        }
    }

    /// Decrements the count, releasing all waiters when it reaches zero.
    ///
    /// Calls after the latch has opened have no effect.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();

        if *remaining == 0 {
            return;
        }

        *remaining -= 1;

        if *remaining == 0 {
            self.released.notify_all();
        }
    }

    /// Blocks the calling thread until the count reaches zero.
    #[cfg_attr(test, mutants::skip)] // Mutations hang the test instead of failing it.
    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();

        while *remaining != 0 {
            self.released.wait(&mut remaining);
        }
    }
}

/// An event that releases a single waiter per [`signal()`][Self::signal] and then resets itself.
///
/// Signalling an event nobody waits on leaves it signalled until the next wait consumes it.
#[derive(Debug, Default)]
pub struct AutoResetWaitableEvent {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl AutoResetWaitableEvent {
    /// Creates an event in the non-signalled state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Signals the event, releasing one current or future waiter.
    pub fn signal(&self) {
        *self.signalled.lock() = true;
        self.condvar.notify_one();
    }

    /// Returns the event to the non-signalled state.
    pub fn reset(&self) {
        *self.signalled.lock() = false;
    }

    /// Blocks until the event is signalled, consuming the signal.
    #[cfg_attr(test, mutants::skip)] // Mutations hang the test instead of failing it.
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();

        while !*signalled {
            self.condvar.wait(&mut signalled);
        }

        *signalled = false;
    }

    /// Blocks until the event is signalled or `timeout` elapses.
    ///
    /// Returns `true` if the wait timed out, in which case no signal was consumed.
    #[cfg_attr(test, mutants::skip)] // Timing dependent, cannot be tested reliably.
    pub fn wait_with_timeout(&self, timeout: Duration) -> bool {
        let mut signalled = self.signalled.lock();

        if !*signalled {
            let _ = self
                .condvar
                .wait_while_for(&mut signalled, |signalled| !*signalled, timeout);
        }

        if *signalled {
            *signalled = false;
            false
        } else {
            true
        }
    }
}
