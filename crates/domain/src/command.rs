//! The command abstraction and its optional capabilities.
//!
//! Every command handles itself against the aggregate it targets. The
//! request dispatcher additionally probes four optional capabilities
//! before dispatch; a command opts into one by overriding the matching
//! `as_*` accessor.

use std::sync::Arc;

use async_trait::async_trait;
use redfishd_events::{AggregateId, CommandId};

use crate::aggregate::RedfishResourceAggregate;
use crate::dispatcher::ResourceRequest;
use crate::error::Result;
use crate::events::ResourceEvent;
use crate::meta::MetaResolver;
use crate::privileges::{AuthAction, Principal};
use crate::tree::ResourceTree;

/// Collaborators a command may consult while handling.
#[derive(Clone)]
pub struct CommandContext {
    pub tree: Arc<ResourceTree>,
    pub resolver: MetaResolver,
}

/// What a successful `handle` produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    /// Appended to the aggregate's log, then published.
    pub events: Vec<ResourceEvent>,
    /// Published only, after `events`.
    pub notifications: Vec<ResourceEvent>,
}

impl CommandOutcome {
    #[must_use]
    pub fn events(events: Vec<ResourceEvent>) -> Self {
        Self {
            events,
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.notifications.is_empty()
    }

    /// Builder-style: add a notification.
    #[must_use]
    pub fn notify(mut self, notification: ResourceEvent) -> Self {
        self.notifications.push(notification);
        self
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    /// Registry name, e.g. `CreateRedfishResource`.
    fn command_type(&self) -> &'static str;

    fn aggregate_id(&self) -> AggregateId;

    /// Check business rules against current state and emit events.
    /// Must not mutate the aggregate.
    async fn handle(
        &self,
        ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome>;

    /// Undo side effects `handle` made outside the log when its events
    /// could not be appended.
    fn rollback(&self, _ctx: &CommandContext) {}

    fn as_cmd_id_setter(&mut self) -> Option<&mut dyn CmdIdSetter> {
        None
    }

    fn as_agg_id_setter(&mut self) -> Option<&mut dyn AggIdSetter> {
        None
    }

    fn as_user_details_setter(&mut self) -> Option<&mut dyn UserDetailsSetter> {
        None
    }

    fn as_http_request_parser(&mut self) -> Option<&mut dyn HttpRequestParser> {
        None
    }
}

/// Accepts the correlation id of the request that produced it.
pub trait CmdIdSetter {
    fn set_cmd_id(&mut self, command_id: CommandId);
}

/// Accepts the id of the aggregate the request resolved to.
pub trait AggIdSetter {
    fn set_agg_id(&mut self, aggregate_id: AggregateId);
}

/// Receives the caller and decides authorization, or defers to the
/// resource's privilege map with [`AuthAction::CheckMaster`].
pub trait UserDetailsSetter {
    fn set_user_details(&mut self, principal: &Principal) -> AuthAction;
}

/// Reads verb-specific input from the request. Runs only after
/// authorization succeeded.
pub trait HttpRequestParser {
    /// # Errors
    ///
    /// Returns `Parse` for a body or query the command cannot accept.
    fn parse_http_request(&mut self, request: &ResourceRequest) -> Result<()>;
}
