//! # uploadq
//!
//! A bounded-concurrency, retrying background upload queue built on Tokio.
//!
//! Callers [`enqueue`](TaskQueue::enqueue) payloads; the queue hands them to an
//! injected [`Uploader`] with at most `max_concurrency` in flight, retries
//! transient failures with linear backoff, and pauses dispatch while the host
//! process is backgrounded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use uploadq::{LifecycleSignal, Payload, QueueConfig, TaskQueue, UploadError, UploadOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = TaskQueue::new(QueueConfig::default(), |payload: Payload| async move {
//!         match payload.get("item_id") {
//!             Some(_) => UploadOutcome::Success,
//!             None => UploadOutcome::Failure(UploadError::permanent("missing item_id")),
//!         }
//!     })?;
//!
//!     let foreground = LifecycleSignal::new();
//!     let _subscription = queue.attach_lifecycle(&foreground);
//!
//!     queue.enqueue(Payload::new(std::fs::read("label.jpg")?).with("item_id", "42"));
//!     queue.subscribe().wait_for(|p| p.is_idle()).await?;
//!     println!("{}", queue.progress());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod lifecycle;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod task;
pub mod uploader;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, QueueConfig};
pub use lifecycle::{LifecycleEvent, LifecycleSignal, LifecycleSource, LifecycleSubscription};
pub use progress::Progress;
pub use queue::{QueueError, TaskQueue};
pub use retry::RetryPolicy;
pub use task::{Payload, Task, TaskId, TaskStatus};
pub use uploader::{UploadError, UploadFuture, UploadOutcome, Uploader};
