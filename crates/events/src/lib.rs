//! Event log, pub/sub and correlation primitives for redfishd.
//!
//! - **Event store**: append-only, per-aggregate logs guarded by an
//!   optimistic version check
//! - **Event bus**: inline observers plus pattern-based subscriptions
//! - **Event waiter**: bounded, predicate-filtered listeners used to wait
//!   for the completion of a specific command
//!
//! # Example
//!
//! ```ignore
//! use redfishd_events::{EventBus, EventPattern, EventWaiter, Event};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! let waiter = EventWaiter::new("http");
//! bus.add_observer(EventPattern::All, Arc::new(waiter.clone())).await;
//!
//! let mut listener = waiter.listen(move |e| e.aggregate_id == id)?;
//! bus.publish(Event::notification(id, payload)).await;
//! let event = listener.wait().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod store;
pub mod types;
pub mod waiter;

// Re-export main types
pub use bus::{EventBus, EventBusBuilder, EventObserver, EventPattern, EventSubscription};
pub use error::{Error, Result};
pub use event::{Event, EventPayload};
pub use store::{EventStore, InMemoryEventStore, TracingEventStore};
pub use types::{AggregateId, CommandId, EventId};
pub use waiter::{DEFAULT_INBOX_CAPACITY, EventListener, EventWaiter};
