//! Property meta-resolution.
//!
//! Reads walk the property tree and let the plugin named in each `GET`
//! binding fill its slot. Writes route meta-backed properties to the
//! controller named in the `PATCH` binding and collect static literals
//! into a diffed update. Callers see the same shape either way.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, join_all};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::aggregate::RedfishResourceAggregate;
use crate::plugin::PluginRegistry;
use crate::privileges::{HttpVerb, Principal};
use crate::property::{
    META_SUFFIX, MetaBinding, ODATA_ETAG, Property, PropertyMap, PropertyValue, flatten,
    is_reserved,
};

/// Redfish message id for a property the resource does not have.
pub const PROPERTY_UNKNOWN: &str = "PropertyUnknown";
/// Redfish message id for a property that cannot be written.
pub const PROPERTY_NOT_WRITABLE: &str = "PropertyNotWritable";
/// Redfish message id for a value of the wrong JSON type.
pub const PROPERTY_VALUE_TYPE_ERROR: &str = "PropertyValueTypeError";
/// Redfish message id for a controller failure.
pub const GENERAL_ERROR: &str = "GeneralError";

/// One property a PATCH could not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFailure {
    pub property: String,
    pub message_id: &'static str,
    pub message: String,
    pub status_code: u16,
}

impl PropertyFailure {
    fn new(property: &str, message_id: &'static str, message: String, status_code: u16) -> Self {
        Self {
            property: property.to_string(),
            message_id,
            message,
            status_code,
        }
    }

    fn unknown(property: &str) -> Self {
        Self::new(
            property,
            PROPERTY_UNKNOWN,
            format!("The property {property} is not in the list of valid properties for the resource."),
            400,
        )
    }

    fn not_writable(property: &str) -> Self {
        Self::new(
            property,
            PROPERTY_NOT_WRITABLE,
            format!("The property {property} is a read only property and cannot be assigned a value."),
            400,
        )
    }

    fn type_error(property: &str, value: &Value) -> Self {
        Self::new(
            property,
            PROPERTY_VALUE_TYPE_ERROR,
            format!("The value {value} for the property {property} is of a different type than the property can accept."),
            400,
        )
    }
}

/// Result of resolving a PATCH body against a resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchOutcome {
    /// Top-level static properties whose value actually changes.
    pub updates: PropertyMap,
    /// Values confirmed by controllers, keyed by property path.
    pub confirmed: Map<String, Value>,
    /// Paths accepted, changed or not.
    pub accepted: Vec<String>,
    pub failures: Vec<PropertyFailure>,
}

impl PatchOutcome {
    /// Whether at least one property was accepted.
    #[must_use]
    pub fn any_accepted(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Resolves meta descriptors against the plugin registry.
#[derive(Clone)]
pub struct MetaResolver {
    plugins: Arc<PluginRegistry>,
}

impl MetaResolver {
    #[must_use]
    pub const fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }

    #[must_use]
    pub const fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    /// The resource as clients see it: every `GET` binding refreshed,
    /// descriptors stripped, private data excluded.
    pub async fn render(&self, aggregate: &RedfishResourceAggregate) -> Map<String, Value> {
        let mut properties = aggregate.properties().clone();
        self.resolve_map(aggregate, &mut properties).await;
        flatten(&properties)
    }

    /// The entity tag clients are served, with any `GET` binding on
    /// `@odata.etag` refreshed.
    pub async fn resolve_etag(&self, aggregate: &RedfishResourceAggregate) -> Option<String> {
        let mut slot = aggregate.property(ODATA_ETAG)?.clone();
        self.resolve_slot(aggregate, ODATA_ETAG, &mut slot).await;
        slot.as_str().map(str::to_string)
    }

    fn resolve_map<'a>(
        &'a self,
        aggregate: &'a RedfishResourceAggregate,
        map: &'a mut PropertyMap,
    ) -> BoxFuture<'a, ()> {
        async move {
            join_all(
                map.iter_mut()
                    .map(|(name, slot)| self.resolve_slot(aggregate, name, slot)),
            )
            .await;
        }
        .boxed()
    }

    fn resolve_slot<'a>(
        &'a self,
        aggregate: &'a RedfishResourceAggregate,
        name: &'a str,
        slot: &'a mut Property,
    ) -> BoxFuture<'a, ()> {
        async move {
            if let Some(binding) = slot.meta.as_ref().and_then(|m| m.get.clone()) {
                self.refresh(aggregate, name, slot, &binding).await;
            }

            match &mut slot.value {
                PropertyValue::Object(children) => self.resolve_map(aggregate, children).await,
                PropertyValue::Array(items) => {
                    join_all(
                        items
                            .iter_mut()
                            .map(|item| self.resolve_slot(aggregate, name, item)),
                    )
                    .await;
                }
                PropertyValue::Scalar(_) => {}
            }
        }
        .boxed()
    }

    /// Degraded reads keep the stored literal.
    async fn refresh(
        &self,
        aggregate: &RedfishResourceAggregate,
        name: &str,
        slot: &mut Property,
        binding: &MetaBinding,
    ) {
        let Some(plugin_name) = binding.plugin.as_deref() else {
            warn!(uri = %aggregate.resource_uri(), property = %name, "GET binding names no plugin");
            return;
        };

        let Some(plugin) = self.plugins.instantiate(plugin_name) else {
            warn!(
                uri = %aggregate.resource_uri(),
                property = %name,
                plugin = %plugin_name,
                "Plugin not registered, serving stored value"
            );
            return;
        };

        if let Err(e) = plugin
            .refresh_property(aggregate, slot, HttpVerb::Get, &binding.params, None)
            .await
        {
            warn!(
                uri = %aggregate.resource_uri(),
                property = %name,
                plugin = %plugin_name,
                status = e.status_code,
                error = %e,
                "Plugin failed to refresh property"
            );
        }
    }

    /// Route each entry of a PATCH body to its backing store.
    pub async fn resolve_patch(
        &self,
        aggregate: &RedfishResourceAggregate,
        body: Map<String, Value>,
        principal: &Principal,
    ) -> PatchOutcome {
        let mut outcome = PatchOutcome::default();
        let changed = self
            .patch_map(aggregate, aggregate.properties(), body, String::new(), principal, &mut outcome)
            .await;
        outcome.updates = changed;
        outcome
    }

    /// Returns the slots of `current` that change, merged with their
    /// existing content.
    fn patch_map<'a>(
        &'a self,
        aggregate: &'a RedfishResourceAggregate,
        current: &'a PropertyMap,
        body: Map<String, Value>,
        prefix: String,
        principal: &'a Principal,
        outcome: &'a mut PatchOutcome,
    ) -> BoxFuture<'a, PropertyMap> {
        async move {
            let mut changed = PropertyMap::new();

            for (name, value) in body {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };

                if is_reserved(&name) || name == ODATA_ETAG || name.ends_with(META_SUFFIX) {
                    outcome.failures.push(PropertyFailure::not_writable(&path));
                    continue;
                }

                let Some(existing) = current.get(&name) else {
                    outcome.failures.push(PropertyFailure::unknown(&path));
                    continue;
                };

                if existing.is_virtual() {
                    self.patch_virtual(aggregate, existing, &path, &value, principal, outcome)
                        .await;
                    continue;
                }

                match (&existing.value, value) {
                    (PropertyValue::Object(children), Value::Object(nested)) => {
                        let nested_changes = self
                            .patch_map(aggregate, children, nested, path.clone(), principal, outcome)
                            .await;
                        if !nested_changes.is_empty() {
                            let mut merged = children.clone();
                            merged.extend(nested_changes);
                            changed.insert(
                                name,
                                Property {
                                    value: PropertyValue::Object(merged),
                                    meta: None,
                                },
                            );
                        }
                    }
                    (PropertyValue::Object(_), other) => {
                        outcome.failures.push(PropertyFailure::type_error(&path, &other));
                    }
                    (_, value) => {
                        let replacement = Property::literal(value);
                        if replacement.value != existing.value {
                            changed.insert(name, replacement);
                        }
                        outcome.accepted.push(path);
                    }
                }
            }

            changed
        }
        .boxed()
    }

    async fn patch_virtual(
        &self,
        aggregate: &RedfishResourceAggregate,
        existing: &Property,
        path: &str,
        value: &Value,
        principal: &Principal,
        outcome: &mut PatchOutcome,
    ) {
        let Some(binding) = existing.meta.as_ref().and_then(|m| m.patch.as_ref()) else {
            outcome.failures.push(PropertyFailure::not_writable(path));
            return;
        };
        let Some(controller_name) = binding.controller.as_deref() else {
            outcome.failures.push(PropertyFailure::not_writable(path));
            return;
        };

        let Some(plugin) = self.plugins.instantiate(controller_name) else {
            warn!(uri = %aggregate.resource_uri(), property = %path, controller = %controller_name, "Controller not registered");
            outcome.failures.push(PropertyFailure::new(
                path,
                GENERAL_ERROR,
                format!("The controller for {path} is unavailable."),
                503,
            ));
            return;
        };
        let Some(controller) = plugin.controller() else {
            outcome.failures.push(PropertyFailure::not_writable(path));
            return;
        };

        match controller
            .update_request(aggregate, path, value, &binding.params, principal)
            .await
        {
            Ok(confirmed) => {
                debug!(uri = %aggregate.resource_uri(), property = %path, "Controller accepted update");
                outcome.confirmed.insert(path.to_string(), confirmed);
                outcome.accepted.push(path.to_string());
            }
            Err(e) => {
                warn!(uri = %aggregate.resource_uri(), property = %path, error = %e, "Controller rejected update");
                outcome.failures.push(PropertyFailure::new(
                    path,
                    GENERAL_ERROR,
                    e.message,
                    e.status_code,
                ));
            }
        }
    }
}
