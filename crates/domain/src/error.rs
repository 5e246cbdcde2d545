//! Domain error type.

use redfishd_events::{AggregateId, CommandId};
use thiserror::Error;

use crate::privileges::HttpVerb;

/// Result type alias for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

/// Everything that can go wrong between a request arriving and its
/// completion event being observed.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No live resource is indexed at this URI.
    #[error("no resource at '{uri}'")]
    ResourceNotFound { uri: String },

    /// A command targeted an aggregate that was never created.
    #[error("aggregate '{aggregate_id}' does not exist")]
    AggregateNotFound { aggregate_id: AggregateId },

    /// A create targeted a URI (or aggregate) that is already live.
    #[error("resource '{uri}' already exists")]
    AlreadyExists { uri: String },

    /// A command targeted a removed aggregate.
    #[error("resource '{uri}' has been removed")]
    ResourceRemoved { uri: String },

    /// The named property does not exist.
    #[error("property '{property}' not found")]
    PropertyNotFound { property: String },

    /// No command is registered under any key of the search path.
    #[error("no command registered for any of {candidates:?}")]
    CommandNotFound { candidates: Vec<String> },

    /// The request body could not be decoded.
    #[error("malformed request body: {reason}")]
    Parse { reason: String },

    /// The caller lacks the privilege the verb requires.
    #[error("insufficient privilege for {verb} on '{uri}'")]
    Unauthorized {
        verb: HttpVerb,
        uri: String,
        authenticated: bool,
    },

    /// `If-Match` did not match the current entity tag.
    #[error("precondition failed for '{uri}'")]
    PreconditionFailed { uri: String },

    /// `If-None-Match` matched the current entity tag.
    #[error("'{uri}' not modified")]
    NotModified { uri: String, etag: String },

    /// A business rule rejected the command.
    #[error("invalid command: {reason}")]
    Invalid { reason: String },

    /// A plugin with this type name is already registered.
    #[error("plugin '{plugin}' is already registered")]
    DuplicatePlugin { plugin: String },

    /// The completion event did not arrive in time.
    #[error("timed out waiting for completion of command {command_id}")]
    Timeout { command_id: CommandId },

    /// Event log or listener failure.
    #[error(transparent)]
    Events(#[from] redfishd_events::Error),
}

impl DomainError {
    /// Create a resource-not-found error.
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    /// Create an already-exists error.
    pub fn already_exists(uri: impl Into<String>) -> Self {
        Self::AlreadyExists { uri: uri.into() }
    }

    /// Create a property-not-found error.
    pub fn property_not_found(property: impl Into<String>) -> Self {
        Self::PropertyNotFound {
            property: property.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create an invalid-command error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Whether the failure lies with the request rather than the server.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Timeout { .. } | Self::Events(_))
    }

    /// HTTP status this error is reported with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ResourceNotFound { .. } => 404,
            Self::Unauthorized {
                authenticated: false,
                ..
            } => 401,
            Self::Unauthorized { .. } => 403,
            Self::PreconditionFailed { .. } => 412,
            Self::NotModified { .. } => 304,
            Self::Timeout { .. } | Self::Events(_) | Self::DuplicatePlugin { .. } => 500,
            Self::AggregateNotFound { .. }
            | Self::AlreadyExists { .. }
            | Self::ResourceRemoved { .. }
            | Self::PropertyNotFound { .. }
            | Self::CommandNotFound { .. }
            | Self::Parse { .. }
            | Self::Invalid { .. } => 400,
        }
    }

    /// Base registry message id for the error body.
    #[must_use]
    pub const fn message_id(&self) -> &'static str {
        match self {
            Self::ResourceNotFound { .. }
            | Self::AggregateNotFound { .. }
            | Self::ResourceRemoved { .. } => "ResourceMissingAtURI",
            Self::CommandNotFound { .. } => "CommandNotFound",
            Self::Unauthorized { .. } => "InsufficientPrivilege",
            Self::Parse { .. } => "MalformedJSON",
            Self::AlreadyExists { .. } => "ResourceAlreadyExists",
            Self::PropertyNotFound { .. } => "PropertyUnknown",
            Self::PreconditionFailed { .. } => "PreconditionFailed",
            Self::NotModified { .. } => "NotModified",
            Self::Invalid { .. } => "GeneralError",
            Self::DuplicatePlugin { .. } | Self::Timeout { .. } | Self::Events(_) => {
                "InternalError"
            }
        }
    }
}
