// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An unpublished crate containing testing utilities for use within this repo.

use std::sync::mpsc;
use std::time::Duration;
use std::{env, thread};

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// This only exists to break out of deadlocks, not for situations that are actually expected.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether the tests are being run by `cargo mutants`.
#[must_use]
pub fn is_mutation_testing() -> bool {
    env::var("MUTATION_TESTING").as_deref() == Ok("1")
}

/// Executes a function on a background thread and abandons it if it does not complete before
/// [`TEST_TIMEOUT`].
///
/// Returns `None` if the function timed out or panicked. Under mutation testing the function
/// runs inline without a timeout, so that a mutation causing a hang is reported as such.
#[cfg_attr(test, mutants::skip)] // This is test logic - pointless to mutate.
#[must_use]
pub fn execute_or_abandon<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if is_mutation_testing() {
        return Some(f());
    }

    let (sender, receiver) = mpsc::channel();

    // A panic drops the sender without sending, which surfaces the same way as a timeout.
    thread::spawn(move || {
        let result = f();
        _ = sender.send(result);
    });

    receiver.recv_timeout(TEST_TIMEOUT).ok()
}
