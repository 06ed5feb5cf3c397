//! Aggregate progress counts derived from the queue contents.

use std::fmt;

use serde::Serialize;

use crate::task::{Task, TaskStatus};

/// Per-status task counts, recomputed from the queue on demand.
///
/// # Examples
///
/// ```
/// use uploadq::Progress;
///
/// let p = Progress { total: 5, pending: 2, uploading: 2, succeeded: 0, failed: 1 };
/// assert_eq!(p.to_string(), "uploading 2/5, 1 failed");
/// assert!(p.has_failures());
/// assert!(!p.is_idle());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl Progress {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        tasks.into_iter().fold(Self::default(), |mut p, task| {
            p.total += 1;
            match task.status() {
                TaskStatus::Pending => p.pending += 1,
                TaskStatus::Uploading => p.uploading += 1,
                TaskStatus::Succeeded => p.succeeded += 1,
                TaskStatus::Failed => p.failed += 1,
            }
            p
        })
    }

    /// Nothing is pending or uploading.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uploading {}/{}", self.uploading, self.total)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}
