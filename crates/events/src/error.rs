//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Event store operation failed.
    #[error("event store operation '{operation}' failed: {reason}")]
    StoreFailed { operation: String, reason: String },

    /// The aggregate log moved past the version the writer loaded.
    #[error("version conflict on aggregate '{aggregate_id}': expected {expected}, found {actual}")]
    VersionConflict {
        aggregate_id: String,
        expected: u64,
        actual: u64,
    },

    /// Subscription or listener registration failed.
    #[error("subscription failed: {reason}")]
    SubscriptionFailed { reason: String },

    /// The listener was closed before a matching event arrived.
    #[error("listener closed")]
    ListenerClosed,

    /// No matching event arrived in time.
    #[error("timed out after {timeout_ms}ms waiting for event")]
    Timeout { timeout_ms: u64 },

    /// Channel closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// A broadcast subscriber fell behind and missed events.
    #[error("subscriber lagged and skipped {skipped} events")]
    Lagged { skipped: u64 },
}

impl Error {
    /// Create a store failed error.
    pub fn store_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a version conflict error.
    pub fn version_conflict(aggregate_id: impl ToString, expected: u64, actual: u64) -> Self {
        Self::VersionConflict {
            aggregate_id: aggregate_id.to_string(),
            expected,
            actual,
        }
    }

    /// Create a subscription failed error.
    pub fn subscription_failed(reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error from a duration.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether retrying after a reload may succeed.
    #[must_use]
    pub const fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
