//! The event envelope.
//!
//! Payloads are owned by the domain; this crate only stamps identity,
//! per-aggregate sequence and time around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AggregateId, EventId};

/// Domain data carried by an [`Event`].
pub trait EventPayload: Clone + Send + Sync + 'static {
    /// Stable type name used for pattern matching and logging.
    fn event_type(&self) -> &'static str;
}

/// An immutable fact about one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    /// 1-based position in the aggregate's log; 0 for publish-only
    /// notifications that never entered the log.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: P,
}

impl<P: EventPayload> Event<P> {
    /// Create an event at a given log position.
    pub fn new(aggregate_id: AggregateId, sequence: u64, payload: P) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id,
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a publish-only notification.
    pub fn notification(aggregate_id: AggregateId, payload: P) -> Self {
        Self::new(aggregate_id, 0, payload)
    }

    /// Get the payload's type name.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Whether this event was appended to a log.
    pub const fn is_persisted(&self) -> bool {
        self.sequence != 0
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::EventPayload;
    use serde::{Deserialize, Serialize};

    /// Minimal payload used by the crate's own tests.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub enum Ping {
        Sent(u32),
        Echoed(u32),
    }

    impl EventPayload for Ping {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Sent(_) => "ping:sent",
                Self::Echoed(_) => "ping:echoed",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Ping;
    use super::*;

    #[test]
    fn test_notification_is_not_persisted() {
        let event = Event::notification(AggregateId::new(), Ping::Sent(1));
        assert!(!event.is_persisted());
        assert_eq!(event.event_type(), "ping:sent");
    }

    #[test]
    fn test_logged_event_is_persisted() {
        let event = Event::new(AggregateId::new(), 1, Ping::Echoed(1));
        assert!(event.is_persisted());
        assert_eq!(event.sequence, 1);
    }
}
