//! The task queue — bounded-concurrency dispatch with automatic retry.
//!
//! [`TaskQueue`] owns every [`Task`] and is the only thing that mutates them.
//! All state lives behind one mutex; uploads run as spawned Tokio tasks and
//! report back through the same lock:
//!
//! ```text
//! enqueue ─┐
//! resume  ─┼─▶ dispatch: lock → mark Uploading → unlock → spawn upload
//! retry   ─┘                                                  │
//!      ▲                                                      ▼
//!      └──── dispatch ◀── lock → apply result → unlock ◀── outcome
//! ```
//!
//! The lock is never held across an `.await`, so network latency never blocks
//! `enqueue` or any other caller.

mod scheduler;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, QueueConfig};
use crate::lifecycle::{LifecycleEvent, LifecycleSource, LifecycleSubscription};
use crate::progress::Progress;
use crate::retry::RetryPolicy;
use crate::task::{Payload, Task, TaskId};
use crate::uploader::{UploadError, UploadOutcome, Uploader};

use scheduler::{Dispatch, QueueState, Resolution};

/// Errors produced while constructing a queue.
///
/// Once built, a queue's operations never fail; upload failures surface only
/// through task status and [`Progress`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("a task queue must be created inside a Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A bounded-concurrency, retrying upload queue.
///
/// Cloning is cheap and yields another handle to the same queue.
///
/// # Examples
///
/// ```rust,no_run
/// use uploadq::{Payload, QueueConfig, TaskQueue, UploadOutcome};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let queue = TaskQueue::new(QueueConfig::default(), |_payload: Payload| async {
///         UploadOutcome::Success
///     })?;
///
///     queue.enqueue(Payload::new(vec![0u8; 1024]).with("item_id", "42"));
///
///     let mut progress = queue.subscribe();
///     progress.wait_for(|p| p.is_idle()).await?;
///     println!("{}", queue.progress());
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<QueueState>,
    uploader: Arc<dyn Uploader>,
    policy: RetryPolicy,
    max_concurrency: usize,
    runtime: Handle,
    progress: watch::Sender<Progress>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("max_concurrency", &self.shared.max_concurrency)
            .field("policy", &self.shared.policy)
            .field("progress", &self.progress())
            .finish()
    }
}

impl TaskQueue {
    /// Creates a queue bound to the current Tokio runtime.
    ///
    /// Uploads and retry timers are spawned onto that runtime, so the returned
    /// handle may be used from any thread afterwards.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Config`] if `config` fails validation.
    /// - [`QueueError::NoRuntime`] if called outside a Tokio runtime.
    pub fn new(config: QueueConfig, uploader: impl Uploader) -> Result<Self, QueueError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| QueueError::NoRuntime)?;
        let (progress, _) = watch::channel(Progress::default());

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                uploader: Arc::new(uploader),
                policy: RetryPolicy::from(&config),
                max_concurrency: config.max_concurrency,
                runtime,
                progress,
            }),
        })
    }

    /// Adds a `Pending` task and tries to dispatch it right away.
    pub fn enqueue(&self, payload: Payload) -> TaskId {
        let size = payload.len();
        let id = {
            let mut state = self.shared.lock();
            let id = state.push(payload, Instant::now());
            self.shared.publish(&state);
            id
        };
        debug!(task = %id, size, "task enqueued");
        self.shared.dispatch();
        id
    }

    /// Deletes every `Succeeded` task. Tasks in any other status are untouched.
    pub fn remove_completed(&self) {
        let mut state = self.shared.lock();
        let removed = state.remove_succeeded();
        if removed > 0 {
            self.shared.publish(&state);
            debug!(removed, "completed tasks removed");
        }
    }

    /// Resets every `Failed` task to `Pending` with `retry_count = 0`, then
    /// dispatches.
    pub fn retry_failed_uploads(&self) {
        let reset = {
            let mut state = self.shared.lock();
            let reset = state.reset_failed();
            if reset > 0 {
                self.shared.publish(&state);
            }
            reset
        };
        if reset > 0 {
            info!(reset, "retrying failed uploads");
            self.shared.dispatch();
        }
    }

    /// Removes all tasks and cancels pending retries.
    ///
    /// Uploads already in flight are not aborted; their results are discarded
    /// when they arrive.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        let removed = state.clear();
        self.shared.publish(&state);
        info!(removed, generation = state.generation(), "queue cleared");
    }

    /// All tasks in enqueue order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.shared.lock().tasks().to_vec()
    }

    /// Looks up a single task.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.shared.lock().task(id).cloned()
    }

    /// Per-status counts as of this call.
    pub fn progress(&self) -> Progress {
        Progress::from_tasks(self.shared.lock().tasks())
    }

    /// Returns a receiver that observes [`Progress`] after every change.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.shared.progress.subscribe()
    }

    /// Applies a host lifecycle transition.
    ///
    /// `Suspended` stops new dispatches; `Resumed` lifts that and dispatches
    /// any pending work.
    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        self.shared.handle_lifecycle(event);
    }

    /// Subscribes the queue to `source` until the returned handle is dropped.
    ///
    /// The listener holds only a weak reference, so it never keeps the queue
    /// alive on its own.
    pub fn attach_lifecycle(&self, source: &impl LifecycleSource) -> LifecycleSubscription {
        let mut events = source.subscribe();
        let queue = Arc::downgrade(&self.shared);

        let listener = self.shared.runtime.spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "lifecycle listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(shared) = queue.upgrade() else {
                    break;
                };
                shared.handle_lifecycle(event);
            }
            debug!("lifecycle listener stopped");
        });

        LifecycleSubscription::new(listener)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State transitions never leave the state half-updated, so a poisoned
        // lock still guards consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueueState) {
        let next = Progress::from_tasks(state.tasks());
        self.progress.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Fills free concurrency slots with the oldest dispatchable tasks.
    ///
    /// Safe to call redundantly and from any thread: tasks are marked
    /// `Uploading` under the lock before the uploader is ever invoked.
    fn dispatch(self: &Arc<Self>) {
        let batch = {
            let mut state = self.lock();
            if state.is_suspended() {
                return;
            }
            let batch = state.take_dispatch_batch(self.max_concurrency);
            if !batch.is_empty() {
                self.publish(&state);
                debug!(in_flight = state.uploading(), "dispatch pass");
            }
            batch
        };

        for job in batch {
            debug!(task = %job.id, "dispatching upload");
            self.spawn_upload(job);
        }
    }

    fn spawn_upload(self: &Arc<Self>, job: Dispatch) {
        let shared = Arc::clone(self);
        let uploader = Arc::clone(&self.uploader);

        self.runtime.spawn(async move {
            let Dispatch {
                id,
                generation,
                payload,
            } = job;

            // A separate task turns an uploader panic into a JoinError instead
            // of leaking the concurrency slot.
            let attempt = shared.runtime.spawn(async move { uploader.upload(payload).await });
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    warn!(task = %id, "uploader panicked");
                    UploadOutcome::Failure(UploadError::new("uploader panicked"))
                }
                Err(_) => UploadOutcome::Failure(UploadError::new("upload cancelled")),
            };

            shared.complete(id, generation, outcome);
        });
    }

    fn complete(self: &Arc<Self>, id: TaskId, generation: u64, outcome: UploadOutcome) {
        let resolution = {
            let mut state = self.lock();
            let resolution = state.complete(id, generation, outcome, &self.policy);
            if let Resolution::Retry { delay, .. } = resolution {
                let timer = self.spawn_backoff(id, generation, delay);
                state.track_backoff(id, timer);
            }
            if resolution != Resolution::Stale {
                self.publish(&state);
            }
            resolution
        };

        match resolution {
            Resolution::Succeeded => info!(task = %id, "upload succeeded"),
            Resolution::Retry { retry_count, delay } => warn!(
                task = %id,
                retry_count,
                delay_ms = millis(delay),
                "upload failed, retry scheduled"
            ),
            Resolution::Failed { retry_count, reason } => warn!(
                task = %id,
                retry_count,
                reason = %reason,
                "upload failed permanently"
            ),
            Resolution::Stale => {
                debug!(task = %id, generation, "discarding stale upload result");
                return;
            }
        }

        self.dispatch();
    }

    fn spawn_backoff(
        self: &Arc<Self>,
        id: TaskId,
        generation: u64,
        delay: Duration,
    ) -> tokio::task::AbortHandle {
        let queue: Weak<Self> = Arc::downgrade(self);
        self.runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = queue.upgrade() {
                    shared.backoff_elapsed(id, generation);
                }
            })
            .abort_handle()
    }

    fn backoff_elapsed(self: &Arc<Self>, id: TaskId, generation: u64) {
        let released = self.lock().release_backoff(id, generation);
        if released {
            debug!(task = %id, "backoff elapsed");
            self.dispatch();
        }
    }

    fn handle_lifecycle(self: &Arc<Self>, event: LifecycleEvent) {
        let has_pending = {
            let mut state = self.lock();
            state.set_suspended(event == LifecycleEvent::Suspended);
            state.has_dispatchable()
        };
        debug!(?event, has_pending, "lifecycle event");
        if event == LifecycleEvent::Resumed && has_pending {
            self.dispatch();
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::{mpsc, oneshot};
    use tokio::time::timeout;

    use super::*;
    use crate::lifecycle::{LifecycleSignal, SIGNAL_CAPACITY};
    use crate::task::TaskStatus;

    // ── Harness ───────────────────────────────────────────────────────────────

    /// One upload attempt, held by the test until it decides the outcome.
    struct Attempt {
        payload: Payload,
        reply: oneshot::Sender<UploadOutcome>,
    }

    impl Attempt {
        fn name(&self) -> &str {
            self.payload.get("name").unwrap()
        }

        fn succeed(self) {
            let _ = self.reply.send(UploadOutcome::Success);
        }

        fn fail(self, reason: &str) {
            let _ = self.reply.send(UploadOutcome::Failure(UploadError::new(reason)));
        }
    }

    fn gated() -> (impl Uploader, mpsc::UnboundedReceiver<Attempt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let uploader = move |payload: Payload| {
            let tx = tx.clone();
            async move {
                let (reply, outcome) = oneshot::channel();
                if tx.send(Attempt { payload, reply }).is_err() {
                    return UploadOutcome::Failure(UploadError::new("harness gone"));
                }
                outcome
                    .await
                    .unwrap_or_else(|_| UploadOutcome::Failure(UploadError::new("reply dropped")))
            }
        };
        (uploader, rx)
    }

    fn config(max_concurrency: usize) -> QueueConfig {
        QueueConfig::default()
            .with_max_concurrency(max_concurrency)
            .with_max_retries(3)
            .with_base_delay(Duration::from_secs(2))
    }

    fn named(name: &str) -> Payload {
        Payload::new(format!("{name}.jpg").into_bytes()).with("name", name)
    }

    async fn next_attempt(rx: &mut mpsc::UnboundedReceiver<Attempt>) -> Attempt {
        timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("no upload attempted")
            .expect("uploader dropped")
    }

    async fn assert_no_attempt(rx: &mut mpsc::UnboundedReceiver<Attempt>, within: Duration) {
        if let Ok(Some(attempt)) = timeout(within, rx.recv()).await {
            panic!("unexpected upload of {}", attempt.name());
        }
    }

    /// Lets spawned uploads and completions run to quiescence.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn status_of(queue: &TaskQueue, id: TaskId) -> TaskStatus {
        queue.task(id).unwrap().status()
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[test]
    fn new_outside_runtime_fails() {
        let (uploader, _rx) = gated();
        let err = TaskQueue::new(QueueConfig::default(), uploader).unwrap_err();
        assert!(matches!(err, QueueError::NoRuntime));
    }

    #[tokio::test]
    async fn new_rejects_zero_concurrency() {
        let (uploader, _rx) = gated();
        let err = TaskQueue::new(config(0), uploader).unwrap_err();
        assert!(matches!(err, QueueError::Config(ConfigError::ZeroConcurrency)));
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn enqueue_dispatches_immediately() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();

        let id = queue.enqueue(named("t1"));
        assert_eq!(status_of(&queue, id), TaskStatus::Uploading);

        let attempt = next_attempt(&mut rx).await;
        assert_eq!(attempt.name(), "t1");
        assert_eq!(attempt.payload.content().as_ref(), b"t1.jpg");
        attempt.succeed();
        settle().await;

        assert_eq!(status_of(&queue, id), TaskStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_respects_concurrency_bound() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();
        for name in ["t1", "t2", "t3", "t4"] {
            queue.enqueue(named(name));
        }

        let a1 = next_attempt(&mut rx).await;
        let a2 = next_attempt(&mut rx).await;
        let mut started = [a1.name(), a2.name()];
        started.sort_unstable();
        assert_eq!(started, ["t1", "t2"]);
        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(queue.progress().uploading, 2);
        assert_eq!(queue.progress().pending, 2);

        a2.succeed();
        let a3 = next_attempt(&mut rx).await;
        assert_eq!(a3.name(), "t3");
        assert!(queue.progress().uploading <= 2);

        a1.succeed();
        let a4 = next_attempt(&mut rx).await;
        assert_eq!(a4.name(), "t4");
        assert!(queue.progress().uploading <= 2);

        a3.succeed();
        a4.succeed();
        settle().await;

        let progress = queue.progress();
        assert_eq!(progress.succeeded, 4);
        assert_eq!(queue.snapshot().len(), 4);

        queue.remove_completed();
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_slot_dispatches_fifo() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        for name in ["a", "b", "c"] {
            queue.enqueue(named(name));
        }

        let mut order = Vec::new();
        for _ in 0..3 {
            let attempt = next_attempt(&mut rx).await;
            order.push(attempt.name().to_owned());
            assert_eq!(queue.progress().uploading, 1);
            attempt.succeed();
        }
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn redundant_dispatch_never_double_dispatches() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();
        queue.enqueue(named("only"));

        for _ in 0..5 {
            queue.handle_lifecycle(LifecycleEvent::Resumed);
            queue.shared.dispatch();
        }

        let attempt = next_attempt(&mut rx).await;
        assert_eq!(attempt.name(), "only");
        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;
        attempt.succeed();
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_from_plain_thread() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();

        let handle = queue.clone();
        let id = std::thread::spawn(move || handle.enqueue(named("bg")))
            .join()
            .unwrap();

        let attempt = next_attempt(&mut rx).await;
        assert_eq!(attempt.name(), "bg");
        attempt.succeed();
        settle().await;
        assert_eq!(status_of(&queue, id), TaskStatus::Succeeded);
    }

    // ── Retry ─────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn retry_then_succeed() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();
        let id = queue.enqueue(named("t1"));
        let mut observed = vec![queue.task(id).unwrap().retry_count()];

        let first = next_attempt(&mut rx).await;
        let failed_at = Instant::now();
        first.fail("timeout");
        settle().await;
        let task = queue.task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert!(task.is_backing_off());
        assert_eq!(task.last_error(), Some("timeout"));
        observed.push(task.retry_count());

        // Not re-dispatchable until the 2s backoff has elapsed.
        assert_no_attempt(&mut rx, Duration::from_millis(1900)).await;
        let second = next_attempt(&mut rx).await;
        assert!(failed_at.elapsed() >= Duration::from_secs(2));

        let failed_at = Instant::now();
        second.fail("timeout");
        settle().await;
        observed.push(queue.task(id).unwrap().retry_count());

        let third = next_attempt(&mut rx).await;
        assert!(failed_at.elapsed() >= Duration::from_secs(4));
        assert_ne!(status_of(&queue, id), TaskStatus::Failed);
        third.succeed();
        settle().await;

        let task = queue.task(id).unwrap();
        assert_eq!(observed, vec![0, 1, 2]);
        assert_eq!(task.status(), TaskStatus::Succeeded);
        assert_eq!(task.retry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_then_manual_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let queue = TaskQueue::new(config(2), move |_payload: Payload| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { UploadOutcome::Failure(UploadError::new("offline")) }
        })
        .unwrap();

        let mut progress = queue.subscribe();
        let id = queue.enqueue(named("t1"));
        progress.wait_for(|p| p.failed == 1).await.unwrap();

        let task = queue.task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.retry_count(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);

        // Terminal: nothing fires on its own, however long we wait.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(status_of(&queue, id), TaskStatus::Failed);

        // Hold dispatch so the reset is observable as `Pending`.
        queue.handle_lifecycle(LifecycleEvent::Suspended);
        queue.retry_failed_uploads();
        let task = queue.task(id).unwrap();
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.retry_count(), 0);

        queue.handle_lifecycle(LifecycleEvent::Resumed);
        assert_eq!(status_of(&queue, id), TaskStatus::Uploading);
        progress.wait_for(|p| p.failed == 1).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let queue = TaskQueue::new(config(2), move |_payload: Payload| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { UploadOutcome::Failure(UploadError::permanent("415 unsupported")) }
        })
        .unwrap();

        let mut progress = queue.subscribe();
        let id = queue.enqueue(named("bad"));
        progress.wait_for(|p| p.failed == 1).await.unwrap();

        let task = queue.task(id).unwrap();
        assert_eq!(task.retry_count(), 0);
        assert_eq!(task.last_error(), Some("415 unsupported"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn uploader_panic_counts_as_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let queue = TaskQueue::new(config(1), move |_payload: Payload| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    panic!("uploader bug");
                }
                UploadOutcome::Success
            }
        })
        .unwrap();

        let mut progress = queue.subscribe();
        let id = queue.enqueue(named("t1"));
        progress.wait_for(|p| p.succeeded == 1).await.unwrap();

        assert_eq!(queue.task(id).unwrap().retry_count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_failed_leaves_other_tasks_alone() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1).with_max_retries(0), uploader).unwrap();
        let ok = queue.enqueue(named("ok"));
        let bad = queue.enqueue(named("bad"));

        next_attempt(&mut rx).await.succeed();
        next_attempt(&mut rx).await.fail("500");
        settle().await;
        assert_eq!(status_of(&queue, bad), TaskStatus::Failed);

        queue.retry_failed_uploads();
        assert_eq!(status_of(&queue, ok), TaskStatus::Succeeded);
        let again = next_attempt(&mut rx).await;
        assert_eq!(again.name(), "bad");
        again.succeed();
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn remove_completed_is_idempotent() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1).with_max_retries(0), uploader).unwrap();
        let done = queue.enqueue(named("done"));
        let failed = queue.enqueue(named("failed"));
        let flying = queue.enqueue(named("flying"));

        next_attempt(&mut rx).await.succeed();
        next_attempt(&mut rx).await.fail("nope");
        let _in_flight = next_attempt(&mut rx).await;

        queue.remove_completed();
        let first: Vec<_> = queue
            .snapshot()
            .iter()
            .map(|t| (t.id(), t.status()))
            .collect();
        queue.remove_completed();
        let second: Vec<_> = queue
            .snapshot()
            .iter()
            .map(|t| (t.id(), t.status()))
            .collect();

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                (failed, TaskStatus::Failed),
                (flying, TaskStatus::Uploading)
            ]
        );
        assert!(queue.task(done).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_flight_discards_late_result() {
        for succeed in [true, false] {
            let (uploader, mut rx) = gated();
            let queue = TaskQueue::new(config(2), uploader).unwrap();
            queue.enqueue(named("t1"));
            let attempt = next_attempt(&mut rx).await;

            queue.clear();
            assert!(queue.snapshot().is_empty());

            if succeed {
                attempt.succeed();
            } else {
                attempt.fail("late");
            }
            settle().await;

            assert!(queue.snapshot().is_empty());
            assert_eq!(queue.progress(), Progress::default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_result_does_not_free_a_new_slot() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();

        let old = queue.enqueue(named("old"));
        let old_attempt = next_attempt(&mut rx).await;
        queue.clear();

        // Counters were reset, so the new task gets the slot straight away.
        let new = queue.enqueue(named("new"));
        assert_ne!(old, new);
        let new_attempt = next_attempt(&mut rx).await;
        assert_eq!(new_attempt.name(), "new");

        old_attempt.succeed();
        settle().await;
        queue.enqueue(named("waiting"));
        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(status_of(&queue, new), TaskStatus::Uploading);

        new_attempt.succeed();
        assert_eq!(next_attempt(&mut rx).await.name(), "waiting");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_pending_retry() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        queue.enqueue(named("t1"));
        next_attempt(&mut rx).await.fail("timeout");
        settle().await;
        assert!(queue.snapshot()[0].is_backing_off());

        queue.clear();
        assert_no_attempt(&mut rx, Duration::from_secs(30)).await;
        assert!(queue.snapshot().is_empty());
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn suspended_queue_waits_for_resume() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();
        let signal = LifecycleSignal::new();
        let subscription = queue.attach_lifecycle(&signal);

        signal.suspended();
        settle().await;
        let id = queue.enqueue(named("t1"));
        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(status_of(&queue, id), TaskStatus::Pending);

        signal.resumed();
        let attempt = next_attempt(&mut rx).await;
        assert_eq!(attempt.name(), "t1");
        attempt.succeed();

        drop(subscription);
        settle().await;
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_upload_finishes_while_suspended() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        let first = queue.enqueue(named("first"));
        queue.enqueue(named("second"));
        let attempt = next_attempt(&mut rx).await;

        queue.handle_lifecycle(LifecycleEvent::Suspended);
        attempt.succeed();
        settle().await;
        assert_eq!(status_of(&queue, first), TaskStatus::Succeeded);
        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;

        queue.handle_lifecycle(LifecycleEvent::Resumed);
        assert_eq!(next_attempt(&mut rx).await.name(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn lagged_listener_applies_latest_resume() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        let signal = LifecycleSignal::new();
        let _subscription = queue.attach_lifecycle(&signal);

        queue.handle_lifecycle(LifecycleEvent::Suspended);
        let id = queue.enqueue(named("t1"));

        // Overflow the channel before the listener gets to run.
        for _ in 0..SIGNAL_CAPACITY + 3 {
            signal.suspended();
        }
        signal.resumed();

        assert_eq!(next_attempt(&mut rx).await.name(), "t1");
        assert_eq!(status_of(&queue, id), TaskStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn lagged_listener_drops_overwritten_resumes() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        let signal = LifecycleSignal::new();
        let _subscription = queue.attach_lifecycle(&signal);

        queue.handle_lifecycle(LifecycleEvent::Suspended);
        let id = queue.enqueue(named("t1"));

        // The resumes are pushed out of the buffer by the suspends behind them.
        for _ in 0..4 {
            signal.resumed();
        }
        for _ in 0..SIGNAL_CAPACITY {
            signal.suspended();
        }

        assert_no_attempt(&mut rx, Duration::from_millis(100)).await;
        assert_eq!(status_of(&queue, id), TaskStatus::Pending);

        signal.resumed();
        assert_eq!(next_attempt(&mut rx).await.name(), "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn listener_stops_when_queue_dropped() {
        let (uploader, _rx) = gated();
        let queue = TaskQueue::new(config(1), uploader).unwrap();
        let signal = LifecycleSignal::new();
        let subscription = queue.attach_lifecycle(&signal);

        drop(queue);
        signal.resumed();
        settle().await;
        assert!(subscription.is_finished());
    }

    #[test]
    fn retry_delay_log_field_saturates() {
        assert_eq!(millis(Duration::from_millis(2500)), 2500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    // ── Progress ──────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_progress_changes() {
        let (uploader, mut rx) = gated();
        let queue = TaskQueue::new(config(2), uploader).unwrap();
        let mut progress = queue.subscribe();

        queue.enqueue(named("t1"));
        assert!(progress.has_changed().unwrap());
        assert_eq!(progress.borrow_and_update().uploading, 1);

        next_attempt(&mut rx).await.succeed();
        let done = *progress.wait_for(|p| p.succeeded == 1).await.unwrap();
        assert_eq!(done.to_string(), "uploading 0/1");
        assert!(done.is_idle());
    }
}
