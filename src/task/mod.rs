//! Task records — the unit of work tracked by the queue.
//!
//! A [`Task`] pairs an immutable identity ([`TaskId`], [`Payload`], enqueue time)
//! with mutable bookkeeping ([`TaskStatus`], retry count, last failure). Callers
//! only ever see clones handed out by [`TaskQueue::snapshot`]; the live records are
//! owned and mutated exclusively by the queue.
//!
//! [`TaskQueue::snapshot`]: crate::queue::TaskQueue::snapshot

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

/// Opaque identifier assigned at enqueue time.
///
/// Identifiers are allocated from a per-queue counter that is never reset, not
/// even by [`TaskQueue::clear`](crate::queue::TaskQueue::clear), so an id is never
/// reused for the lifetime of a queue instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// ```text
/// Pending ──dispatch──▶ Uploading ──success──▶ Succeeded
///    ▲                      │
///    ├──failure, retries left (after backoff)
///    │                      └──failure, exhausted──▶ Failed
///    └──────────── retry_failed_uploads ─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a concurrency slot (or for its retry delay to elapse).
    Pending,
    /// Handed to the uploader; occupies one concurrency slot.
    Uploading,
    /// Terminal: the uploader reported success.
    Succeeded,
    /// Terminal: retries are exhausted. Only an explicit retry revives it.
    Failed,
}

impl TaskStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The content handed to the uploader: raw bytes plus small key/value context.
///
/// Content is stored as [`Bytes`], so cloning a payload for each dispatch
/// attempt never copies the image data.
///
/// # Examples
///
/// ```
/// use uploadq::Payload;
///
/// let payload = Payload::new(vec![0xFFu8, 0xD8, 0xFF])
///     .with("item_id", "sku-1042")
///     .with("store_id", "7");
///
/// assert_eq!(payload.len(), 3);
/// assert_eq!(payload.get("item_id"), Some("sku-1042"));
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct Payload {
    #[serde(rename = "size", serialize_with = "serialize_len")]
    content: Bytes,
    metadata: BTreeMap<String, String>,
}

fn serialize_len<S: Serializer>(content: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(content.len() as u64)
}

impl Payload {
    /// Creates a payload with the given content and no metadata.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Returns the content bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Returns the content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns `true` if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Returns the metadata value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Returns all metadata entries in key order.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// A unit of upload work tracked by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    id: TaskId,
    payload: Payload,
    status: TaskStatus,
    retry_count: u32,
    last_error: Option<String>,
    #[serde(skip)]
    enqueued_at: Instant,
    // Set while a failed attempt waits out its backoff; the scheduler skips it.
    #[serde(skip)]
    backing_off: bool,
}

impl Task {
    pub(crate) fn new(id: TaskId, payload: Payload, enqueued_at: Instant) -> Self {
        Self {
            id,
            payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            last_error: None,
            enqueued_at,
            backing_off: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Number of failed attempts that were followed by an automatic retry.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Reason reported by the most recent failed attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Monotonic time at which the task was enqueued.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Returns `true` while the task is pending but still inside its retry delay.
    pub fn is_backing_off(&self) -> bool {
        self.status == TaskStatus::Pending && self.backing_off
    }

    /// Eligible for dispatch: pending and not waiting on a retry delay.
    pub(crate) fn is_dispatchable(&self) -> bool {
        self.status == TaskStatus::Pending && !self.backing_off
    }

    // ── State transitions (queue-internal) ───────────────────────────────────

    /// `Pending → Uploading`.
    pub(crate) fn mark_uploading(&mut self) {
        debug_assert!(self.is_dispatchable());
        self.status = TaskStatus::Uploading;
    }

    /// `Uploading → Succeeded`.
    pub(crate) fn mark_succeeded(&mut self) {
        debug_assert_eq!(self.status, TaskStatus::Uploading);
        self.status = TaskStatus::Succeeded;
        self.last_error = None;
    }

    /// `Uploading → Pending`, parked until its backoff timer releases it.
    pub(crate) fn mark_retrying(&mut self, reason: String) {
        debug_assert_eq!(self.status, TaskStatus::Uploading);
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.last_error = Some(reason);
        self.backing_off = true;
    }

    /// `Uploading → Failed`.
    pub(crate) fn mark_failed(&mut self, reason: String) {
        debug_assert_eq!(self.status, TaskStatus::Uploading);
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason);
    }

    /// Ends the backoff period; the task becomes dispatchable again.
    pub(crate) fn release_backoff(&mut self) {
        self.backing_off = false;
    }

    /// `Failed → Pending` with the retry budget restored.
    pub(crate) fn reset_for_retry(&mut self) {
        debug_assert_eq!(self.status, TaskStatus::Failed);
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.backing_off = false;
    }
}
