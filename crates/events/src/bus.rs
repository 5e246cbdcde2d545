//! Event bus for pub/sub fan-out.
//!
//! Two kinds of consumer are supported. Observers are called inline
//! during `publish` and must not block; they are how the URI index and
//! the correlation waiter see every event in publish order. Pattern
//! subscriptions receive events over a broadcast channel and suit
//! long-running consumer tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{Event, EventPayload};
use crate::types::AggregateId;

/// Synchronous consumer invoked for every matching published event.
pub trait EventObserver<P>: Send + Sync {
    /// Handle one event. Must return promptly.
    fn notify(&self, event: &Event<P>);
}

/// Subscription handle for receiving events.
pub struct EventSubscription<P> {
    receiver: broadcast::Receiver<Event<P>>,
}

impl<P: EventPayload> EventSubscription<P> {
    /// Receive the next event.
    ///
    /// # Errors
    ///
    /// Returns `Lagged` if this subscription fell behind (it can keep
    /// receiving afterwards) and `ChannelClosed` once the bus is gone.
    pub async fn recv(&mut self) -> Result<Event<P>> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
        })
    }

    /// Try to receive an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when nothing is ready or the bus is gone.
    pub fn try_recv(&mut self) -> Result<Event<P>> {
        self.receiver.try_recv().map_err(|_| Error::ChannelClosed)
    }
}

/// Pattern for filtering events.
#[derive(Debug, Clone)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match events by type.
    ByType(String),
    /// Match events by aggregate ID.
    ByAggregate(AggregateId),
    /// Match events by multiple types.
    ByTypes(Vec<String>),
}

impl EventPattern {
    /// Check if an event matches this pattern.
    pub fn matches<P: EventPayload>(&self, event: &Event<P>) -> bool {
        match self {
            Self::All => true,
            Self::ByType(t) => event.event_type() == t,
            Self::ByAggregate(id) => event.aggregate_id == *id,
            Self::ByTypes(types) => types.iter().any(|t| event.event_type() == t),
        }
    }
}

struct Subscriber<P> {
    sender: broadcast::Sender<Event<P>>,
    pattern: EventPattern,
}

struct RegisteredObserver<P> {
    pattern: EventPattern,
    observer: Arc<dyn EventObserver<P>>,
}

/// Event bus for publishing and subscribing to events.
pub struct EventBus<P> {
    /// Broadcast sender for all events.
    broadcast: broadcast::Sender<Event<P>>,
    /// Pattern-based subscribers.
    subscribers: RwLock<HashMap<String, Subscriber<P>>>,
    /// Inline observers.
    observers: RwLock<HashMap<String, RegisteredObserver<P>>>,
    /// Next subscriber/observer ID.
    next_id: AtomicU64,
    /// Capacity of each pattern subscription channel.
    channel_capacity: usize,
}

impl<P: EventPayload> EventBus<P> {
    /// Create a new event bus with default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    fn with_capacity(channel_capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(channel_capacity);
        Self {
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            channel_capacity,
        }
    }

    fn allocate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}_{n}")
    }

    /// Publish an event.
    ///
    /// Observers run inline first, then pattern subscribers and the
    /// global broadcast are fed. Delivery never blocks on a slow consumer.
    pub async fn publish(&self, event: Event<P>) {
        debug!(
            event_id = %event.event_id,
            event_type = event.event_type(),
            aggregate_id = %event.aggregate_id,
            sequence = event.sequence,
            "Publishing event"
        );

        {
            let observers = self.observers.read().await;
            observers
                .values()
                .filter(|o| o.pattern.matches(&event))
                .for_each(|o| o.observer.notify(&event));
        }

        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers
                .iter()
                .filter(|(_, sub)| sub.pattern.matches(&event))
            {
                if sub.sender.send(event.clone()).is_err() {
                    debug!(
                        subscriber = %id,
                        event_type = event.event_type(),
                        "Subscriber has no live receiver"
                    );
                }
            }
        }

        let _ = self.broadcast.send(event);
    }

    /// Publish several events in order.
    pub async fn publish_all(&self, events: Vec<Event<P>>) {
        for event in events {
            self.publish(event).await;
        }
    }

    /// Register an inline observer; returns its ID for removal.
    pub async fn add_observer(
        &self,
        pattern: EventPattern,
        observer: Arc<dyn EventObserver<P>>,
    ) -> String {
        let id = self.allocate_id("obs");
        let mut observers = self.observers.write().await;
        observers.insert(id.clone(), RegisteredObserver { pattern, observer });
        id
    }

    /// Remove an inline observer.
    pub async fn remove_observer(&self, observer_id: &str) {
        let mut observers = self.observers.write().await;
        observers.remove(observer_id);
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventSubscription<P> {
        EventSubscription {
            receiver: self.broadcast.subscribe(),
        }
    }

    /// Subscribe to events matching a pattern.
    pub async fn subscribe_with_pattern(
        &self,
        pattern: EventPattern,
    ) -> (String, EventSubscription<P>) {
        let (sender, receiver) = broadcast::channel(self.channel_capacity);
        let id = self.allocate_id("sub");

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id.clone(), Subscriber { sender, pattern });

        (id, EventSubscription { receiver })
    }

    /// Unsubscribe a pattern-based subscriber.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(subscriber_id);
    }

    /// Number of inline observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }
}

impl<P: EventPayload> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for EventBus.
pub struct EventBusBuilder {
    channel_capacity: usize,
}

impl EventBusBuilder {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }

    /// Set the broadcast channel capacity.
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Build the event bus.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionFailed` for a zero channel capacity.
    pub fn build<P: EventPayload>(self) -> Result<EventBus<P>> {
        if self.channel_capacity == 0 {
            return Err(Error::subscription_failed(
                "channel capacity must be greater than 0",
            ));
        }
        Ok(EventBus::with_capacity(self.channel_capacity))
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::test_support::Ping;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
    }

    impl EventObserver<Ping> for Recorder {
        fn notify(&self, event: &Event<Ping>) {
            let (Ping::Sent(n) | Ping::Echoed(n)) = event.payload;
            self.seen.lock().unwrap().push(n);
        }
    }

    // ==========================================================================
    // EventPattern BEHAVIORAL TESTS
    // ==========================================================================

    #[test]
    fn should_match_all_events_with_all_pattern() {
        let event = Event::notification(AggregateId::new(), Ping::Sent(1));

        assert!(
            EventPattern::All.matches(&event),
            "All pattern should match any event"
        );
    }

    #[test]
    fn should_match_event_by_exact_type() {
        let event = Event::notification(AggregateId::new(), Ping::Echoed(1));

        assert!(EventPattern::ByType("ping:echoed".to_string()).matches(&event));
        assert!(!EventPattern::ByType("ping:sent".to_string()).matches(&event));
    }

    #[test]
    fn should_match_event_by_aggregate() {
        let matching = AggregateId::new();
        let event = Event::notification(matching, Ping::Sent(1));

        assert!(EventPattern::ByAggregate(matching).matches(&event));
        assert!(!EventPattern::ByAggregate(AggregateId::new()).matches(&event));
    }

    #[test]
    fn should_match_event_by_multiple_types() {
        let event = Event::notification(AggregateId::new(), Ping::Sent(1));

        let pattern = EventPattern::ByTypes(vec!["ping:echoed".into(), "ping:sent".into()]);
        assert!(pattern.matches(&event));

        let pattern = EventPattern::ByTypes(vec!["ping:echoed".into()]);
        assert!(!pattern.matches(&event));
    }

    // ==========================================================================
    // EventBus BEHAVIORAL TESTS
    // ==========================================================================

    #[tokio::test]
    async fn should_notify_observers_in_publish_order() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.add_observer(EventPattern::All, recorder.clone()).await;

        for n in 1..=3 {
            bus.publish(Event::notification(AggregateId::new(), Ping::Sent(n)))
                .await;
        }

        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn should_filter_observers_by_pattern() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.add_observer(EventPattern::ByType("ping:echoed".into()), recorder.clone())
            .await;

        bus.publish(Event::notification(AggregateId::new(), Ping::Sent(1)))
            .await;
        bus.publish(Event::notification(AggregateId::new(), Ping::Echoed(2)))
            .await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn should_stop_notifying_removed_observer() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder::default());
        let id = bus.add_observer(EventPattern::All, recorder.clone()).await;

        bus.remove_observer(&id).await;
        bus.publish(Event::notification(AggregateId::new(), Ping::Sent(1)))
            .await;

        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(bus.observer_count().await, 0);
    }

    #[tokio::test]
    async fn should_deliver_to_pattern_subscription() {
        let bus = EventBus::new();
        let (_, mut sub) = bus
            .subscribe_with_pattern(EventPattern::ByType("ping:sent".into()))
            .await;

        bus.publish(Event::notification(AggregateId::new(), Ping::Echoed(1)))
            .await;
        bus.publish(Event::notification(AggregateId::new(), Ping::Sent(2)))
            .await;

        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload, Ping::Sent(2));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_report_lag_for_slow_subscriber() {
        let bus = EventBusBuilder::new()
            .with_channel_capacity(2)
            .build::<Ping>()
            .unwrap();
        let (_, mut sub) = bus.subscribe_with_pattern(EventPattern::All).await;

        for n in 0..5 {
            bus.publish(Event::notification(AggregateId::new(), Ping::Sent(n)))
                .await;
        }

        assert!(matches!(sub.recv().await, Err(Error::Lagged { .. })));
        assert!(sub.recv().await.is_ok());
    }

    #[tokio::test]
    async fn should_not_block_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(Event::notification(AggregateId::new(), Ping::Sent(1)))
            .await;
        let mut sub = bus.subscribe();
        bus.publish(Event::notification(AggregateId::new(), Ping::Sent(2)))
            .await;

        assert_eq!(sub.recv().await.unwrap().payload, Ping::Sent(2));
    }

    // ==========================================================================
    // EventBusBuilder BEHAVIORAL TESTS
    // ==========================================================================

    #[test]
    fn should_fail_to_build_with_zero_capacity() {
        let result = EventBusBuilder::new()
            .with_channel_capacity(0)
            .build::<Ping>();

        assert!(result.is_err(), "Building with zero capacity should fail");
    }
}
