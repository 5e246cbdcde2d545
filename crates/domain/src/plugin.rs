//! Property plugins and the registry that names them.
//!
//! A plugin computes property values on demand (`refresh_property`);
//! it may also expose a [`PropertyController`] that accepts writes.
//! The registry is filled at startup and read on every request; late
//! registration is allowed and guarded by a reader/writer lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::RedfishResourceAggregate;
use crate::error::{DomainError, Result};
use crate::privileges::{HttpVerb, Principal};
use crate::property::Property;

/// Failure reported by a plugin or controller, carrying the HTTP status
/// it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PluginError {
    pub status_code: u16,
    pub message: String,
}

impl PluginError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// The proposed value was rejected (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// The backing agent could not be reached (503).
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }
}

/// Computes property values for resources bound to it.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name the registry and meta descriptors refer to.
    fn plugin_type(&self) -> &str;

    /// Fill `slot` with the current value. `params` are the descriptor's
    /// free-form parameters; `body` is the proposed value for writes.
    async fn refresh_property(
        &self,
        aggregate: &RedfishResourceAggregate,
        slot: &mut Property,
        verb: HttpVerb,
        params: &Map<String, Value>,
        body: Option<&Value>,
    ) -> std::result::Result<(), PluginError>;

    /// Write-side capability, if this plugin accepts PATCH.
    fn controller(&self) -> Option<&dyn PropertyController> {
        None
    }

    /// Release resources when unregistered.
    fn close(&self) {}
}

/// Accepts proposed property values, possibly after a round trip to a
/// remote agent, and returns the value actually applied.
#[async_trait]
pub trait PropertyController: Send + Sync {
    async fn update_request(
        &self,
        aggregate: &RedfishResourceAggregate,
        property: &str,
        value: &Value,
        params: &Map<String, Value>,
        principal: &Principal,
    ) -> std::result::Result<Value, PluginError>;
}

/// Produces a plugin instance on demand.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Lookup from plugin type to factory.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; its type name is learned from one instance.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePlugin` if the name is taken.
    pub fn register(&self, factory: PluginFactory) -> Result<String> {
        let name = factory().plugin_type().to_string();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if factories.contains_key(&name) {
            return Err(DomainError::DuplicatePlugin { plugin: name });
        }

        info!(plugin = %name, "Registered plugin");
        factories.insert(name.clone(), factory);
        Ok(name)
    }

    /// Register a shared instance.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePlugin` if the name is taken.
    pub fn register_instance(&self, plugin: Arc<dyn Plugin>) -> Result<String> {
        self.register(Arc::new(move || Arc::clone(&plugin)))
    }

    /// Instantiate the plugin registered under `name`.
    #[must_use]
    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        factory.map(|f| f())
    }

    /// Remove a registration, closing its instance. Returns whether one
    /// existed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);

        removed.is_some_and(|factory| {
            factory().close();
            debug!(plugin = %name, "Unregistered plugin");
            true
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn plugin_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Fixed {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Plugin for Fixed {
        fn plugin_type(&self) -> &str {
            "fixed"
        }

        async fn refresh_property(
            &self,
            _aggregate: &RedfishResourceAggregate,
            slot: &mut Property,
            _verb: HttpVerb,
            _params: &Map<String, Value>,
            _body: Option<&Value>,
        ) -> std::result::Result<(), PluginError> {
            *slot = Property::scalar(42);
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn should_register_and_instantiate() {
        let registry = PluginRegistry::new();
        let name = registry.register_instance(Arc::new(Fixed::default())).unwrap();

        assert_eq!(name, "fixed");
        assert!(registry.contains("fixed"));
        assert_eq!(registry.instantiate("fixed").unwrap().plugin_type(), "fixed");
        assert!(registry.instantiate("missing").is_none());
    }

    #[test]
    fn should_reject_duplicate_registration() {
        let registry = PluginRegistry::new();
        registry.register_instance(Arc::new(Fixed::default())).unwrap();

        let result = registry.register(Arc::new(|| Arc::new(Fixed::default()) as Arc<dyn Plugin>));

        assert!(matches!(result, Err(DomainError::DuplicatePlugin { .. })));
    }

    #[test]
    fn should_close_on_unregister() {
        let registry = PluginRegistry::new();
        let plugin = Arc::new(Fixed::default());
        registry.register_instance(plugin.clone()).unwrap();

        assert!(registry.unregister("fixed"));
        assert!(plugin.closed.load(Ordering::SeqCst));
        assert!(!registry.unregister("fixed"));
        assert!(registry.plugin_types().is_empty());
    }

    #[tokio::test]
    async fn should_fill_slot() {
        let registry = PluginRegistry::new();
        registry.register_instance(Arc::new(Fixed::default())).unwrap();
        let aggregate = RedfishResourceAggregate::new(redfishd_events::AggregateId::new());
        let mut slot = Property::default();

        registry
            .instantiate("fixed")
            .unwrap()
            .refresh_property(&aggregate, &mut slot, HttpVerb::Get, &Map::new(), None)
            .await
            .unwrap();

        assert_eq!(slot.to_json(), serde_json::json!(42));
    }
}
