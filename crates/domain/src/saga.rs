//! Keeps collection `Members` in step with the resources under them.

use std::sync::Arc;

use redfishd_events::{Error as EventsError, EventBus, EventPattern, EventSubscription};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::{AddCollectionMember, RemoveCollectionMember};
use crate::events::{RESOURCE_CREATED, RESOURCE_REMOVED, ResourceEvent};
use crate::handler::CommandBus;
use crate::tree::{ResourceTree, parent_uri};

/// Reacts to creations and removals by updating the parent collection.
pub struct CollectionSaga {
    commands: Arc<CommandBus>,
    tree: Arc<ResourceTree>,
}

impl CollectionSaga {
    #[must_use]
    pub const fn new(commands: Arc<CommandBus>, tree: Arc<ResourceTree>) -> Self {
        Self { commands, tree }
    }

    /// Subscribe now and process events on a detached task until the bus
    /// goes away.
    pub async fn spawn(self, bus: &EventBus<ResourceEvent>) -> JoinHandle<()> {
        let (_, subscription) = bus
            .subscribe_with_pattern(EventPattern::ByTypes(vec![
                RESOURCE_CREATED.to_string(),
                RESOURCE_REMOVED.to_string(),
            ]))
            .await;
        tokio::spawn(self.run(subscription))
    }

    async fn run(self, mut subscription: EventSubscription<ResourceEvent>) {
        info!("Collection saga started");
        loop {
            match subscription.recv().await {
                Ok(event) => self.on_event(&event.payload).await,
                Err(EventsError::Lagged { skipped }) => {
                    warn!(skipped, "Collection saga lagged; membership may be stale");
                }
                Err(_) => break,
            }
        }
        debug!("Collection saga stopped");
    }

    async fn on_event(&self, payload: &ResourceEvent) {
        let (member_uri, added) = match payload {
            ResourceEvent::Created(created) => (created.resource_uri.as_str(), true),
            ResourceEvent::Removed(removed) => (removed.resource_uri.as_str(), false),
            _ => return,
        };
        let Some(parent_id) = parent_uri(member_uri).and_then(|parent| self.tree.lookup(parent)) else {
            return;
        };

        match self.commands.repository().find(parent_id).await {
            Ok(parent) if parent.is_collection() && parent.is_live() => {}
            Ok(_) => return,
            Err(e) => {
                warn!(member = %member_uri, error = %e, "Could not load parent collection");
                return;
            }
        }

        let result = if added {
            self.commands
                .handle(&AddCollectionMember {
                    id: parent_id,
                    member_uri: member_uri.to_string(),
                })
                .await
        } else {
            self.commands
                .handle(&RemoveCollectionMember {
                    id: parent_id,
                    member_uri: member_uri.to_string(),
                })
                .await
        };

        if let Err(e) = result {
            warn!(member = %member_uri, added, error = %e, "Failed to update collection membership");
        }
    }
}
