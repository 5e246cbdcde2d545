//! The command bus: load, handle, append, fold, publish.

use std::sync::Arc;

use redfishd_events::{Event, EventBus};
use tracing::{debug, info, warn};

use crate::aggregate::{RedfishResourceAggregate, ResourceState};
use crate::command::{Command, CommandContext};
use crate::error::Result;
use crate::events::ResourceEvent;
use crate::repository::AggregateRepository;

/// Default number of reload-and-retry rounds after a version conflict.
pub const DEFAULT_MAX_VERSION_RETRIES: u32 = 3;

pub struct CommandBus {
    repository: Arc<AggregateRepository>,
    bus: Arc<EventBus<ResourceEvent>>,
    ctx: CommandContext,
    max_version_retries: u32,
}

impl CommandBus {
    #[must_use]
    pub const fn new(
        repository: Arc<AggregateRepository>,
        bus: Arc<EventBus<ResourceEvent>>,
        ctx: CommandContext,
    ) -> Self {
        Self {
            repository,
            bus,
            ctx,
            max_version_retries: DEFAULT_MAX_VERSION_RETRIES,
        }
    }

    #[must_use]
    pub const fn with_max_version_retries(mut self, retries: u32) -> Self {
        self.max_version_retries = retries;
        self
    }

    #[must_use]
    pub const fn repository(&self) -> &Arc<AggregateRepository> {
        &self.repository
    }

    #[must_use]
    pub const fn context(&self) -> &CommandContext {
        &self.ctx
    }

    /// Run a command against its aggregate.
    ///
    /// The aggregate stays locked from handling through publication, so
    /// events of one aggregate reach observers in log order. Returns the
    /// appended events; notifications are published but not returned.
    ///
    /// # Errors
    ///
    /// The command's own rejection, or a store error once the version
    /// conflict retries are spent. Nothing is appended or published on
    /// error.
    pub async fn handle(&self, command: &dyn Command) -> Result<Vec<Event<ResourceEvent>>> {
        self.handle_guarded(command, &|_: &RedfishResourceAggregate| Ok(()))
            .await
    }

    /// As [`handle`](Self::handle), with `guard` checked against the
    /// locked aggregate before every handling attempt.
    ///
    /// # Errors
    ///
    /// The guard's rejection, then as for [`handle`](Self::handle).
    pub async fn handle_guarded(
        &self,
        command: &dyn Command,
        guard: &(dyn Fn(&RedfishResourceAggregate) -> Result<()> + Send + Sync),
    ) -> Result<Vec<Event<ResourceEvent>>> {
        let id = command.aggregate_id();
        let mut aggregate = self.repository.lock(id).await?;
        let mut conflicts = 0_u32;

        let (committed, notifications) = loop {
            let checked = match guard(&*aggregate) {
                Ok(()) => command.handle(&self.ctx, &aggregate).await,
                Err(e) => Err(e),
            };
            let outcome = match checked {
                Ok(outcome) => outcome,
                Err(e) => {
                    debug!(command = command.command_type(), aggregate_id = %id, error = %e, "Command rejected");
                    self.release_if_dead(&aggregate);
                    return Err(e);
                }
            };

            if outcome.events.is_empty() {
                break (Vec::new(), outcome.notifications);
            }

            match self
                .repository
                .store()
                .append(id, aggregate.version(), outcome.events)
                .await
            {
                Ok(events) => break (events, outcome.notifications),
                Err(e) if e.is_version_conflict() && conflicts < self.max_version_retries => {
                    conflicts = conflicts.saturating_add(1);
                    warn!(command = command.command_type(), aggregate_id = %id, attempt = conflicts, "Version conflict, reloading");
                    command.rollback(&self.ctx);
                    self.repository.catch_up(&mut aggregate).await?;
                }
                Err(e) => {
                    command.rollback(&self.ctx);
                    return Err(e.into());
                }
            }
        };

        for event in &committed {
            aggregate.apply(event);
        }
        if !committed.is_empty() {
            info!(
                command = command.command_type(),
                aggregate_id = %id,
                version = aggregate.version(),
                events = committed.len(),
                "Command committed"
            );
        }

        self.bus.publish_all(committed.clone()).await;
        for notification in notifications {
            self.bus.publish(Event::notification(id, notification)).await;
        }

        self.release_if_dead(&aggregate);
        Ok(committed)
    }

    /// Uncreated and removed aggregates accept no further commands; keep
    /// them out of the cache.
    fn release_if_dead(&self, aggregate: &RedfishResourceAggregate) {
        if aggregate.state() != ResourceState::Created {
            self.repository.evict(aggregate.id());
        }
    }
}
