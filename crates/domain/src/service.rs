//! Wiring of the domain components into one service.

use std::sync::Arc;

use redfishd_core::Config;
use redfishd_events::{
    AggregateId, EventBus, EventBusBuilder, EventPattern, EventWaiter, InMemoryEventStore,
    TracingEventStore,
};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

use crate::command::{Command, CommandContext};
use crate::dispatcher::{RequestDispatcher, ResourceRequest, ResourceResponse};
use crate::error::Result;
use crate::events::{RESOURCE_CREATED, RESOURCE_REMOVED, ResourceEvent};
use crate::handler::CommandBus;
use crate::meta::MetaResolver;
use crate::plugin::{Plugin, PluginRegistry};
use crate::registry::CommandRegistry;
use crate::repository::{AggregateRepository, SharedStore};
use crate::saga::CollectionSaga;
use crate::tree::ResourceTree;

/// Builder for [`RedfishService`].
pub struct ServiceBuilder {
    config: Config,
    store: Option<SharedStore>,
    registry: Option<CommandRegistry>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ServiceBuilder {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            registry: None,
            plugins: Vec::new(),
        }
    }

    /// Use this event store instead of a fresh in-memory one.
    #[must_use]
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this command registry instead of the defaults.
    #[must_use]
    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Assemble the service and start the collection saga.
    ///
    /// # Errors
    ///
    /// `DuplicatePlugin` for clashing plugin names, or an events error for
    /// a zero bus capacity.
    pub async fn build(self) -> Result<RedfishService> {
        let plugins = Arc::new(PluginRegistry::new());
        for plugin in self.plugins {
            plugins.register_instance(plugin)?;
        }

        let store = self.store.unwrap_or_else(|| {
            Arc::new(TracingEventStore::<_, ResourceEvent>::new(
                InMemoryEventStore::new(),
            ))
        });
        let bus = Arc::new(
            EventBusBuilder::new()
                .with_channel_capacity(self.config.events.bus_capacity)
                .build::<ResourceEvent>()?,
        );
        let waiter = EventWaiter::with_inbox_capacity("http", self.config.events.waiter_inbox_capacity);
        let tree = Arc::new(ResourceTree::with_plugins(Arc::clone(&plugins)));

        bus.add_observer(
            EventPattern::ByTypes(vec![RESOURCE_CREATED.to_string(), RESOURCE_REMOVED.to_string()]),
            Arc::clone(&tree) as _,
        )
        .await;
        bus.add_observer(EventPattern::All, Arc::new(waiter.clone())).await;

        let ctx = CommandContext {
            tree: Arc::clone(&tree),
            resolver: MetaResolver::new(Arc::clone(&plugins)),
        };
        let repository = Arc::new(AggregateRepository::new(store));
        let commands = Arc::new(
            CommandBus::new(repository, Arc::clone(&bus), ctx)
                .with_max_version_retries(self.config.commands.max_version_retries),
        );
        let registry = Arc::new(self.registry.unwrap_or_else(CommandRegistry::with_defaults));

        let saga = CollectionSaga::new(Arc::clone(&commands), Arc::clone(&tree))
            .spawn(&bus)
            .await;

        let dispatcher = RequestDispatcher::new(
            Arc::clone(&tree),
            Arc::clone(&commands),
            Arc::clone(&registry),
            waiter.clone(),
        )
        .with_timeout(self.config.commands.request_timeout());

        info!(
            plugins = plugins.plugin_types().len(),
            http_commands = registry.http_keys().len(),
            "Redfish service assembled"
        );

        Ok(RedfishService {
            config: self.config,
            tree,
            plugins,
            registry,
            commands,
            bus,
            waiter,
            dispatcher,
            saga,
        })
    }
}

/// The assembled domain: tree, plugins, commands and the request bridge.
pub struct RedfishService {
    config: Config,
    tree: Arc<ResourceTree>,
    plugins: Arc<PluginRegistry>,
    registry: Arc<CommandRegistry>,
    commands: Arc<CommandBus>,
    bus: Arc<EventBus<ResourceEvent>>,
    waiter: EventWaiter<ResourceEvent>,
    dispatcher: RequestDispatcher,
    saga: JoinHandle<()>,
}

impl RedfishService {
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn tree(&self) -> &Arc<ResourceTree> {
        &self.tree
    }

    pub const fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub const fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub const fn commands(&self) -> &Arc<CommandBus> {
        &self.commands
    }

    pub const fn bus(&self) -> &Arc<EventBus<ResourceEvent>> {
        &self.bus
    }

    /// The waiter every published event is offered to.
    pub const fn waiter(&self) -> &EventWaiter<ResourceEvent> {
        &self.waiter
    }

    /// Route an HTTP request through the bridge.
    ///
    /// # Errors
    ///
    /// See [`RequestDispatcher::dispatch`].
    pub async fn dispatch(&self, request: ResourceRequest) -> Result<ResourceResponse> {
        self.dispatcher.dispatch(request).await
    }

    /// Run a typed command directly, bypassing routing and authorization.
    ///
    /// # Errors
    ///
    /// The command's rejection or a store error.
    pub async fn execute(&self, command: &dyn Command) -> Result<AggregateId> {
        self.commands.handle(command).await?;
        Ok(command.aggregate_id())
    }

    /// Decode an internal command by name and run it.
    ///
    /// # Errors
    ///
    /// `CommandNotFound` for an unknown name, `Parse` for a body that does
    /// not fit, then as for [`execute`](Self::execute).
    pub async fn execute_internal(&self, name: &str, body: Value) -> Result<AggregateId> {
        let command = self.registry.decode_internal(name, body)?;
        self.execute(command.as_ref()).await
    }

    /// Stop background work and close every plugin.
    pub fn shutdown(&self) {
        self.saga.abort();
        for name in self.plugins.plugin_types() {
            self.plugins.unregister(&name);
        }
        info!("Redfish service stopped");
    }
}
