//! Aggregate loading and per-aggregate locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use redfishd_events::{AggregateId, EventStore};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::aggregate::RedfishResourceAggregate;
use crate::error::Result;
use crate::events::ResourceEvent;

pub type SharedStore = Arc<dyn EventStore<ResourceEvent>>;

/// Caches folded aggregates, each behind its own async lock.
///
/// Holding the guard from [`lock`](Self::lock) serializes every command
/// and every property resolution for that aggregate.
pub struct AggregateRepository {
    store: SharedStore,
    cache: Mutex<HashMap<AggregateId, Arc<AsyncMutex<RedfishResourceAggregate>>>>,
}

impl AggregateRepository {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Lock an aggregate, caught up with every committed event.
    ///
    /// # Errors
    ///
    /// Returns a store error if the log cannot be read.
    pub async fn lock(&self, id: AggregateId) -> Result<OwnedMutexGuard<RedfishResourceAggregate>> {
        let slot = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                cache
                    .entry(id)
                    .or_insert_with(|| Arc::new(AsyncMutex::new(RedfishResourceAggregate::new(id)))),
            )
        };

        let mut guard = slot.lock_owned().await;
        self.catch_up(&mut guard).await?;
        Ok(guard)
    }

    /// Refold from the log if another writer moved it.
    ///
    /// # Errors
    ///
    /// Returns a store error if the log cannot be read.
    pub async fn catch_up(&self, aggregate: &mut RedfishResourceAggregate) -> Result<()> {
        let version = self.store.version(aggregate.id()).await?;
        if version != aggregate.version() {
            trace!(aggregate_id = %aggregate.id(), from = aggregate.version(), to = version, "Reloading aggregate");
            let events = self.store.load(aggregate.id()).await?;
            *aggregate = RedfishResourceAggregate::from_events(aggregate.id(), &events);
        }
        Ok(())
    }

    /// A point-in-time copy. Only live aggregates stay cached.
    ///
    /// # Errors
    ///
    /// Returns a store error if the log cannot be read.
    pub async fn find(&self, id: AggregateId) -> Result<RedfishResourceAggregate> {
        let aggregate = self.lock(id).await?;
        if !aggregate.is_live() {
            self.evict(id);
        }
        Ok(aggregate.clone())
    }

    /// Forget a cached aggregate. The next access reloads it.
    pub fn evict(&self, id: AggregateId) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
