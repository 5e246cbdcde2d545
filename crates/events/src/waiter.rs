//! Correlation waiter.
//!
//! A waiter is a single bus observer that fans events out to many
//! short-lived listeners. Each listener owns a bounded inbox and a
//! predicate; a caller registers a listener *before* triggering the work
//! it wants to observe, then waits on it.
//!
//! Delivery never blocks the publisher. When a listener's inbox is full
//! the event is dropped for that listener and counted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::bus::EventObserver;
use crate::error::{Error, Result};
use crate::event::{Event, EventPayload};

/// Default bounded inbox length for each listener.
pub const DEFAULT_INBOX_CAPACITY: usize = 20;

type Predicate<P> = Box<dyn Fn(&Event<P>) -> bool + Send + Sync>;

struct ListenerSlot<P> {
    event_type: Option<&'static str>,
    predicate: Predicate<P>,
    sender: mpsc::Sender<Event<P>>,
    dropped: Arc<AtomicU64>,
}

struct WaiterInner<P> {
    name: String,
    inbox_capacity: usize,
    listeners: Mutex<HashMap<u64, ListenerSlot<P>>>,
    next_id: AtomicU64,
}

impl<P> WaiterInner<P> {
    fn listeners(&self) -> MutexGuard<'_, HashMap<u64, ListenerSlot<P>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out of bus events to predicate-filtered listeners.
pub struct EventWaiter<P> {
    inner: Arc<WaiterInner<P>>,
}

impl<P> Clone for EventWaiter<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> fmt::Debug for EventWaiter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWaiter")
            .field("name", &self.inner.name)
            .field("inbox_capacity", &self.inner.inbox_capacity)
            .finish_non_exhaustive()
    }
}

impl<P: EventPayload> EventWaiter<P> {
    /// Create a waiter with the default inbox capacity.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_inbox_capacity(name, DEFAULT_INBOX_CAPACITY)
    }

    /// Create a waiter whose listeners buffer at most `inbox_capacity`
    /// undrained events.
    pub fn with_inbox_capacity(name: impl Into<String>, inbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(WaiterInner {
                name: name.into(),
                inbox_capacity,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener receiving every event the predicate accepts.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` if the waiter was built with a zero
    /// inbox capacity.
    pub fn listen<F>(&self, predicate: F) -> Result<EventListener<P>>
    where
        F: Fn(&Event<P>) -> bool + Send + Sync + 'static,
    {
        self.register(None, Box::new(predicate))
    }

    /// Register a listener that only considers events of one type.
    ///
    /// # Errors
    ///
    /// Same as [`EventWaiter::listen`].
    pub fn listen_for_type<F>(&self, event_type: &'static str, predicate: F) -> Result<EventListener<P>>
    where
        F: Fn(&Event<P>) -> bool + Send + Sync + 'static,
    {
        self.register(Some(event_type), Box::new(predicate))
    }

    fn register(
        &self,
        event_type: Option<&'static str>,
        predicate: Predicate<P>,
    ) -> Result<EventListener<P>> {
        if self.inner.inbox_capacity == 0 {
            return Err(Error::subscription_failed(format!(
                "waiter '{}' has a zero inbox capacity",
                self.inner.name
            )));
        }

        let (sender, receiver) = mpsc::channel(self.inner.inbox_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner.listeners().insert(
            id,
            ListenerSlot {
                event_type,
                predicate,
                sender,
                dropped: Arc::clone(&dropped),
            },
        );

        Ok(EventListener {
            id,
            waiter: Arc::downgrade(&self.inner),
            receiver,
            dropped,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }

    /// Name used in log output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl<P: EventPayload> EventObserver<P> for EventWaiter<P> {
    fn notify(&self, event: &Event<P>) {
        let listeners = self.inner.listeners();
        for (id, slot) in listeners.iter() {
            if slot.event_type.is_some_and(|t| t != event.event_type()) {
                continue;
            }
            if !(slot.predicate)(event) {
                continue;
            }

            match slot.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        waiter = %self.inner.name,
                        listener = id,
                        event_type = dropped.event_type(),
                        aggregate_id = %dropped.aggregate_id,
                        "Listener inbox full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(waiter = %self.inner.name, listener = id, "Listener receiver gone");
                }
            }
        }
    }
}

/// A registered, predicate-filtered subscription.
///
/// Dropping the listener deregisters it, so every exit path releases
/// the subscription.
pub struct EventListener<P> {
    id: u64,
    waiter: Weak<WaiterInner<P>>,
    receiver: mpsc::Receiver<Event<P>>,
    dropped: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl<P: EventPayload> EventListener<P> {
    /// Wait for the next matching event.
    ///
    /// Cancel by dropping the future (e.g. from `tokio::select!` or a
    /// request that went away).
    ///
    /// # Errors
    ///
    /// Returns `ListenerClosed` once the listener is closed and its inbox
    /// is drained.
    pub async fn wait(&mut self) -> Result<Event<P>> {
        self.receiver.recv().await.ok_or(Error::ListenerClosed)
    }

    /// Wait for the next matching event, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` on expiry, or `ListenerClosed` as for `wait`.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Event<P>> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::timeout(timeout))?
    }

    /// Take an already-buffered event without waiting.
    pub fn try_next(&mut self) -> Option<Event<P>> {
        self.receiver.try_recv().ok()
    }
}

impl<P> EventListener<P> {
    /// Deregister from the waiter. Idempotent; buffered events stay
    /// readable.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(waiter) = self.waiter.upgrade() {
            waiter.listeners().remove(&self.id);
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Events that matched but were dropped because the inbox was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<P> Drop for EventListener<P> {
    fn drop(&mut self) {
        self.close();
    }
}
