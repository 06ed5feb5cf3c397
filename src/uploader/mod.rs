//! Uploader seam — the external collaborator that actually moves bytes.
//!
//! The queue never performs I/O itself. Each dispatch attempt calls
//! [`Uploader::upload`] exactly once and awaits the returned future outside the
//! queue's state lock. Retries are the queue's job, not the uploader's.
//!
//! Any `Fn(Payload) -> impl Future<Output = UploadOutcome>` that is
//! `Send + Sync + 'static` is an [`Uploader`] via the blanket impl below:
//!
//! ```rust,no_run
//! use uploadq::{Payload, UploadError, UploadOutcome, Uploader};
//!
//! fn assert_uploader(_: impl Uploader) {}
//!
//! assert_uploader(|payload: Payload| async move {
//!     if payload.is_empty() {
//!         UploadOutcome::Failure(UploadError::permanent("empty image"))
//!     } else {
//!         UploadOutcome::Success
//!     }
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::task::Payload;

/// Boxed future returned by [`Uploader::upload`].
pub type UploadFuture = Pin<Box<dyn Future<Output = UploadOutcome> + Send>>;

/// Result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success,
    Failure(UploadError),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<Result<(), UploadError>> for UploadOutcome {
    fn from(result: Result<(), UploadError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) => Self::Failure(e),
        }
    }
}

/// Why an upload attempt failed.
///
/// Failures are retryable by default. A permanent failure (e.g. the server
/// rejected the image outright) skips the remaining retry budget and moves the
/// task straight to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct UploadError {
    reason: String,
    retryable: bool,
}

impl UploadError {
    /// A transient failure, eligible for automatic retry.
    pub fn new(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
            retryable: true,
        }
    }

    /// A failure that retrying cannot fix.
    pub fn permanent(reason: impl fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
            retryable: false,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Performs a single upload attempt.
///
/// # Contract
///
/// - Called at most once per `Pending → Uploading` transition.
/// - May run concurrently with other attempts, up to the queue's
///   `max_concurrency`.
/// - Owns its own timeouts; the queue imposes none.
/// - Must not retry internally.
pub trait Uploader: Send + Sync + 'static {
    fn upload(&self, payload: Payload) -> UploadFuture;
}

impl<T, F> Uploader for T
where
    T: Fn(Payload) -> F + Send + Sync + 'static,
    F: Future<Output = UploadOutcome> + Send + 'static,
{
    fn upload(&self, payload: Payload) -> UploadFuture {
        Box::pin((self)(payload))
    }
}
