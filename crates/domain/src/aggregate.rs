//! The per-resource aggregate.
//!
//! State is the left fold of the resource's event log. Commands read it;
//! only events change it.

use std::collections::BTreeMap;

use redfishd_events::{AggregateId, Event};
use serde_json::{Map, Value};

use crate::error::{DomainError, Result};
use crate::events::{ApplyEvent, ResourceEvent};
use crate::privileges::PrivilegeMap;
use crate::property::{
    MEMBERS, ODATA_CONTEXT, ODATA_ID, ODATA_TYPE, Property, PropertyMap,
    PropertyValue,
};

/// Lifecycle of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// No `Created` event has been folded yet.
    Uninitialized,
    /// Live; accepts commands.
    Created,
    /// Terminal.
    Removed,
}

#[derive(Debug, Clone)]
pub struct RedfishResourceAggregate {
    pub(crate) id: AggregateId,
    pub(crate) version: u64,
    pub(crate) state: ResourceState,
    pub(crate) resource_uri: String,
    pub(crate) plugin: Option<String>,
    pub(crate) collection: bool,
    pub(crate) properties: PropertyMap,
    pub(crate) private: Map<String, Value>,
    pub(crate) privileges: PrivilegeMap,
    pub(crate) headers: BTreeMap<String, String>,
}

impl RedfishResourceAggregate {
    /// A fresh, uninitialized aggregate.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            version: 0,
            state: ResourceState::Uninitialized,
            resource_uri: String::new(),
            plugin: None,
            collection: false,
            properties: PropertyMap::new(),
            private: Map::new(),
            privileges: PrivilegeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Rebuild from a log in sequence order.
    #[must_use]
    pub fn from_events(id: AggregateId, events: &[Event<ResourceEvent>]) -> Self {
        events.iter().fold(Self::new(id), |mut aggregate, event| {
            aggregate.apply(event);
            aggregate
        })
    }

    /// Fold one logged event.
    pub fn apply(&mut self, event: &Event<ResourceEvent>) {
        event.payload.apply_to(self);
        self.version = event.sequence;
    }

    /// Fail unless the resource is live.
    ///
    /// # Errors
    ///
    /// `AggregateNotFound` before creation, `ResourceRemoved` after removal.
    pub fn ensure_live(&self) -> Result<()> {
        match self.state {
            ResourceState::Created => Ok(()),
            ResourceState::Uninitialized => Err(DomainError::AggregateNotFound {
                aggregate_id: self.id,
            }),
            ResourceState::Removed => Err(DomainError::ResourceRemoved {
                uri: self.resource_uri.clone(),
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> AggregateId {
        self.id
    }

    /// Sequence of the last folded event.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn state(&self) -> ResourceState {
        self.state
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == ResourceState::Created
    }

    #[must_use]
    pub fn resource_uri(&self) -> &str {
        &self.resource_uri
    }

    #[must_use]
    pub fn odata_id(&self) -> Option<&str> {
        self.property(ODATA_ID).and_then(Property::as_str)
    }

    #[must_use]
    pub fn odata_type(&self) -> Option<&str> {
        self.property(ODATA_TYPE).and_then(Property::as_str)
    }

    #[must_use]
    pub fn odata_context(&self) -> Option<&str> {
        self.property(ODATA_CONTEXT).and_then(Property::as_str)
    }

    /// Plugin bound to this resource for fallback dispatch.
    #[must_use]
    pub fn plugin_type(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    #[must_use]
    pub const fn is_collection(&self) -> bool {
        self.collection
    }

    #[must_use]
    pub const fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Server-side data never rendered to clients.
    #[must_use]
    pub const fn private(&self) -> &Map<String, Value> {
        &self.private
    }

    #[must_use]
    pub const fn privileges(&self) -> &PrivilegeMap {
        &self.privileges
    }

    /// Headers copied into every response for this resource.
    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub(crate) fn member_entries(&self) -> Vec<Property> {
        match self.property(MEMBERS).map(|m| &m.value) {
            Some(PropertyValue::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// URIs listed in `Members`.
    #[must_use]
    pub fn member_uris(&self) -> Vec<String> {
        self.member_entries()
            .iter()
            .filter_map(|m| {
                m.children()
                    .and_then(|c| c.get(ODATA_ID))
                    .and_then(Property::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}
