//! Event store trait and implementations.
//!
//! The store is an append-only log partitioned by aggregate. Appends are
//! guarded by a compare-and-swap on the aggregate's version so that two
//! writers racing on the same aggregate cannot both succeed.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::event::{Event, EventPayload};
use crate::types::{AggregateId, EventId};

/// Trait for event storage backends.
#[async_trait]
pub trait EventStore<P: EventPayload>: Send + Sync {
    /// Append payloads to an aggregate's log.
    ///
    /// Succeeds only if the log is still at `expected_version`; the store
    /// stamps each payload with an id, the next sequence numbers and the
    /// current time, and returns the stamped events in order.
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: u64,
        payloads: Vec<P>,
    ) -> Result<Vec<Event<P>>>;

    /// Read an aggregate's full log in sequence order.
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<Event<P>>>;

    /// Current version (sequence of the last event, 0 when empty).
    async fn version(&self, aggregate_id: AggregateId) -> Result<u64>;

    /// Read events across all aggregates, in append order, after `from`.
    async fn read(&self, from: Option<EventId>) -> Result<Vec<Event<P>>>;

    /// Get the total number of events.
    async fn count(&self) -> Result<usize>;
}

struct Log<P> {
    events: Vec<Event<P>>,
    aggregate_index: HashMap<AggregateId, Vec<usize>>,
}

impl<P> Default for Log<P> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            aggregate_index: HashMap::new(),
        }
    }
}

/// In-memory event store.
pub struct InMemoryEventStore<P> {
    log: RwLock<Log<P>>,
}

impl<P> Default for InMemoryEventStore<P> {
    fn default() -> Self {
        Self {
            log: RwLock::new(Log::default()),
        }
    }
}

impl<P: EventPayload> InMemoryEventStore<P> {
    /// Create a new in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory event store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn as_version(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[async_trait]
impl<P: EventPayload> EventStore<P> for InMemoryEventStore<P> {
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: u64,
        payloads: Vec<P>,
    ) -> Result<Vec<Event<P>>> {
        let mut log = self.log.write().await;
        let Log {
            events,
            aggregate_index,
        } = &mut *log;

        let positions = aggregate_index.entry(aggregate_id).or_default();
        let actual = as_version(positions.len());
        if actual != expected_version {
            return Err(Error::version_conflict(aggregate_id, expected_version, actual));
        }

        let stamped: Vec<Event<P>> = payloads
            .into_iter()
            .zip(1_u64..)
            .map(|(payload, offset)| {
                Event::new(aggregate_id, actual.saturating_add(offset), payload)
            })
            .collect();

        for event in &stamped {
            positions.push(events.len());
            events.push(event.clone());
        }

        Ok(stamped)
    }

    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<Event<P>>> {
        let log = self.log.read().await;

        Ok(log
            .aggregate_index
            .get(&aggregate_id)
            .map(|positions| {
                positions
                    .iter()
                    .filter_map(|&i| log.events.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn version(&self, aggregate_id: AggregateId) -> Result<u64> {
        let log = self.log.read().await;
        Ok(log
            .aggregate_index
            .get(&aggregate_id)
            .map_or(0, |positions| as_version(positions.len())))
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<Event<P>>> {
        let log = self.log.read().await;

        let start = from
            .and_then(|from_id| log.events.iter().position(|e| e.event_id == from_id))
            .map_or(0, |pos| pos.saturating_add(1));

        Ok(log.events.iter().skip(start).cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        let log = self.log.read().await;
        Ok(log.events.len())
    }
}

/// A wrapper that adds tracing to an event store.
pub struct TracingEventStore<S, P> {
    inner: S,
    _payload: PhantomData<fn() -> P>,
}

impl<S, P> TracingEventStore<S, P>
where
    S: EventStore<P>,
    P: EventPayload,
{
    /// Create a new tracing event store.
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<S, P> EventStore<P> for TracingEventStore<S, P>
where
    S: EventStore<P>,
    P: EventPayload,
{
    #[instrument(skip(self, payloads), fields(count = payloads.len()))]
    async fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: u64,
        payloads: Vec<P>,
    ) -> Result<Vec<Event<P>>> {
        let types: Vec<&'static str> = payloads.iter().map(EventPayload::event_type).collect();
        tracing::debug!(?types, "Appending events");

        let result = self
            .inner
            .append(aggregate_id, expected_version, payloads)
            .await;
        match &result {
            Ok(events) => {
                let version = events.last().map_or(expected_version, |e| e.sequence);
                tracing::trace!(version, "Events appended");
            }
            Err(e) => tracing::debug!(error = %e, "Append rejected"),
        }
        result
    }

    #[instrument(skip(self))]
    async fn load(&self, aggregate_id: AggregateId) -> Result<Vec<Event<P>>> {
        self.inner.load(aggregate_id).await
    }

    async fn version(&self, aggregate_id: AggregateId) -> Result<u64> {
        self.inner.version(aggregate_id).await
    }

    async fn read(&self, from: Option<EventId>) -> Result<Vec<Event<P>>> {
        tracing::debug!(from = ?from, "Reading events");
        self.inner.read(from).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
