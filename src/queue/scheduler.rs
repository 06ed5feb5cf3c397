//! Queue state and the dispatch/completion state machine.
//!
//! Everything here is synchronous and runs under the queue's state lock. The
//! async side (spawning uploads, arming backoff timers) lives in the parent
//! module; this file only decides *what* happens.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::retry::RetryPolicy;
use crate::task::{Payload, Task, TaskId, TaskStatus};
use crate::uploader::UploadOutcome;

/// One task selected for upload, carrying what the async side needs.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub id: TaskId,
    pub generation: u64,
    pub payload: Payload,
}

/// What a completed upload did to its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Resolution {
    Succeeded,
    Retry { retry_count: u32, delay: Duration },
    Failed { retry_count: u32, reason: String },
    /// The result belongs to a cleared generation or an unknown task.
    Stale,
}

/// Shared mutable queue state. Owned by one `Mutex` in the queue.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    // Enqueue order; ids are monotonic so this is also `enqueued_at` order.
    tasks: Vec<Task>,
    next_id: u64,
    uploading: usize,
    // Bumped by `clear` so late results from earlier uploads are recognizable.
    generation: u64,
    suspended: bool,
    backoff_timers: HashMap<TaskId, AbortHandle>,
}

impl QueueState {
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn uploading(&self) -> usize {
        self.uploading
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn has_dispatchable(&self) -> bool {
        self.tasks.iter().any(Task::is_dispatchable)
    }

    pub fn push(&mut self, payload: Payload, now: Instant) -> TaskId {
        self.next_id += 1;
        let id = TaskId::new(self.next_id);
        self.tasks.push(Task::new(id, payload, now));
        id
    }

    /// Selects up to the free slot count of dispatchable tasks, oldest first,
    /// and marks them `Uploading` before returning them.
    ///
    /// Because selection and marking happen under one borrow, a second call
    /// can never pick a task the first one already returned.
    pub fn take_dispatch_batch(&mut self, max_concurrency: usize) -> Vec<Dispatch> {
        debug_assert_eq!(
            self.uploading,
            self.tasks
                .iter()
                .filter(|t| t.status() == TaskStatus::Uploading)
                .count()
        );

        let available = max_concurrency.saturating_sub(self.uploading);
        if available == 0 {
            return Vec::new();
        }

        let generation = self.generation;
        let batch: Vec<Dispatch> = self
            .tasks
            .iter_mut()
            .filter(|t| t.is_dispatchable())
            .take(available)
            .map(|task| {
                task.mark_uploading();
                Dispatch {
                    id: task.id(),
                    generation,
                    payload: task.payload().clone(),
                }
            })
            .collect();

        self.uploading += batch.len();
        batch
    }

    /// Applies an upload result and releases the task's slot.
    pub fn complete(
        &mut self,
        id: TaskId,
        generation: u64,
        outcome: UploadOutcome,
        policy: &RetryPolicy,
    ) -> Resolution {
        if generation != self.generation {
            return Resolution::Stale;
        }
        let Some(task) = self
            .tasks
            .iter_mut()
            .find(|t| t.id() == id && t.status() == TaskStatus::Uploading)
        else {
            return Resolution::Stale;
        };

        self.uploading -= 1;

        match outcome {
            UploadOutcome::Success => {
                task.mark_succeeded();
                Resolution::Succeeded
            }
            UploadOutcome::Failure(err)
                if err.is_retryable() && policy.should_retry(task.retry_count()) =>
            {
                let delay = policy.delay_for(task.retry_count() + 1);
                task.mark_retrying(err.reason().to_owned());
                Resolution::Retry {
                    retry_count: task.retry_count(),
                    delay,
                }
            }
            UploadOutcome::Failure(err) => {
                let reason = err.reason().to_owned();
                task.mark_failed(reason.clone());
                Resolution::Failed {
                    retry_count: task.retry_count(),
                    reason,
                }
            }
        }
    }

    pub fn track_backoff(&mut self, id: TaskId, timer: AbortHandle) {
        if let Some(previous) = self.backoff_timers.insert(id, timer) {
            previous.abort();
        }
    }

    /// Ends a task's backoff. Returns `false` if the timer is stale.
    pub fn release_backoff(&mut self, id: TaskId, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.backoff_timers.remove(&id);
        match self.tasks.iter_mut().find(|t| t.id() == id) {
            Some(task) if task.is_backing_off() => {
                task.release_backoff();
                true
            }
            _ => false,
        }
    }

    /// Moves every `Failed` task back to `Pending` with a fresh retry budget.
    pub fn reset_failed(&mut self) -> usize {
        let mut reset = 0;
        for task in self
            .tasks
            .iter_mut()
            .filter(|t| t.status() == TaskStatus::Failed)
        {
            task.reset_for_retry();
            reset += 1;
        }
        reset
    }

    /// Drops every `Succeeded` task. Returns how many were removed.
    pub fn remove_succeeded(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.status() != TaskStatus::Succeeded);
        before - self.tasks.len()
    }

    /// Forgets all tasks, cancels backoff timers, and starts a new generation.
    /// The id counter and suspension flag survive.
    pub fn clear(&mut self) -> usize {
        for (_, timer) in self.backoff_timers.drain() {
            timer.abort();
        }
        let removed = self.tasks.len();
        self.tasks.clear();
        self.uploading = 0;
        self.generation += 1;
        removed
    }
}
