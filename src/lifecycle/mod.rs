//! Host-process lifecycle signals.
//!
//! The queue's only coupling to the host is a stream of [`LifecycleEvent`]s.
//! `Resumed` means "the process is back in the foreground, pick up any pending
//! work"; `Suspended` means "stop issuing new dispatches". Uploads already in
//! flight are owned by the uploader and keep running either way.
//!
//! Any type that can hand out a [`broadcast::Receiver`] is a [`LifecycleSource`].
//! [`LifecycleSignal`] is the stock implementation: hosts call
//! [`resumed`](LifecycleSignal::resumed) from their foreground hook, and tests use
//! it as a double.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// Lifecycle events are rare; a small buffer is plenty and lagging is harmless.
pub(crate) const SIGNAL_CAPACITY: usize = 16;

/// A host-process lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The process regained foreground execution.
    Resumed,
    /// The process is about to be backgrounded.
    Suspended,
}

/// A producer of [`LifecycleEvent`]s the queue can subscribe to.
pub trait LifecycleSource {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// Broadcast-backed [`LifecycleSource`].
///
/// Cloning yields another handle to the same channel.
///
/// # Examples
///
/// ```
/// use uploadq::{LifecycleEvent, LifecycleSignal, LifecycleSource};
///
/// let signal = LifecycleSignal::new();
/// let mut rx = signal.subscribe();
/// signal.resumed();
/// assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Resumed);
/// ```
#[derive(Debug, Clone)]
pub struct LifecycleSignal {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    /// Broadcasts `event` to every subscriber. Returns how many received it.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        // No subscribers is not an error for a fire-and-forget signal.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn resumed(&self) -> usize {
        self.emit(LifecycleEvent::Resumed)
    }

    pub fn suspended(&self) -> usize {
        self.emit(LifecycleEvent::Suspended)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl LifecycleSource for LifecycleSignal {
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

/// Keeps a queue subscribed to a [`LifecycleSource`].
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// stops the listener task.
#[derive(Debug)]
#[must_use = "the queue unsubscribes as soon as this is dropped"]
pub struct LifecycleSubscription {
    listener: JoinHandle<()>,
}

impl LifecycleSubscription {
    pub(crate) fn new(listener: JoinHandle<()>) -> Self {
        Self { listener }
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    /// Returns `true` once the listener has stopped, e.g. because the source
    /// closed or the queue was dropped.
    pub fn is_finished(&self) -> bool {
        self.listener.is_finished()
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
