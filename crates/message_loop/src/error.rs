// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for message loop operations that return an [`Error`][enum@Error]
/// on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the message loop machinery.
///
/// Structural outcomes of the task queue registry (such as a rejected merge) are reported as
/// plain booleans instead. This type covers misuse of the run loop API and failures of the
/// environment, like being unable to start a thread. Future versions may add variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller of some API made a mistake (e.g. called an operation out of sequence).
    #[error("{0}")]
    Programming(String),

    /// We are re-packaging an error from the Rust standard library I/O logic
    /// without adding further details.
    #[error(transparent)]
    StdIo(#[from] std::io::Error),
}
