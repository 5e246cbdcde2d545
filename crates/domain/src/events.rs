//! Resource events.
//!
//! Each payload folds itself into the aggregate through [`ApplyEvent`].
//! `HttpCmdProcessed` is a publish-only completion notification and
//! leaves state untouched.

use std::collections::BTreeMap;

use redfishd_events::{CommandId, EventPayload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::aggregate::{RedfishResourceAggregate, ResourceState};
use crate::privileges::PrivilegeMap;
use crate::property::{MEMBERS, MEMBERS_COUNT, ODATA_ID, Property, PropertyMap, PropertyValue};

pub const RESOURCE_CREATED: &str = "RedfishResource:created";
pub const RESOURCE_REMOVED: &str = "RedfishResource:removed";
pub const PROPERTIES_UPDATED: &str = "RedfishResourceProperties:updated";
pub const PROPERTY_REMOVED: &str = "RedfishResourceProperty:removed";
pub const PRIVILEGES_UPDATED: &str = "RedfishResourcePrivileges:updated";
pub const COLLECTION_MEMBER_ADDED: &str = "RedfishResourceCollection:memberAdded";
pub const COLLECTION_MEMBER_REMOVED: &str = "RedfishResourceCollection:memberRemoved";
pub const HTTP_CMD_PROCESSED: &str = "HTTPCmdProcessed";

/// Folds an event payload into aggregate state.
pub trait ApplyEvent {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResourceEvent {
    Created(ResourceCreated),
    PropertiesUpdated(PropertiesUpdated),
    PropertyRemoved(PropertyRemoved),
    PrivilegesUpdated(PrivilegesUpdated),
    CollectionMemberAdded(CollectionMemberChanged),
    CollectionMemberRemoved(CollectionMemberChanged),
    Removed(ResourceRemoved),
    HttpCmdProcessed(HttpCmdProcessed),
}

impl EventPayload for ResourceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => RESOURCE_CREATED,
            Self::PropertiesUpdated(_) => PROPERTIES_UPDATED,
            Self::PropertyRemoved(_) => PROPERTY_REMOVED,
            Self::PrivilegesUpdated(_) => PRIVILEGES_UPDATED,
            Self::CollectionMemberAdded(_) => COLLECTION_MEMBER_ADDED,
            Self::CollectionMemberRemoved(_) => COLLECTION_MEMBER_REMOVED,
            Self::Removed(_) => RESOURCE_REMOVED,
            Self::HttpCmdProcessed(_) => HTTP_CMD_PROCESSED,
        }
    }
}

impl ResourceEvent {
    /// URI of the resource the event concerns, when it carries one.
    #[must_use]
    pub fn resource_uri(&self) -> Option<&str> {
        match self {
            Self::Created(e) => Some(&e.resource_uri),
            Self::PropertiesUpdated(e) => Some(&e.resource_uri),
            Self::PropertyRemoved(e) => Some(&e.resource_uri),
            Self::PrivilegesUpdated(e) => Some(&e.resource_uri),
            Self::CollectionMemberAdded(e) | Self::CollectionMemberRemoved(e) => {
                Some(&e.resource_uri)
            }
            Self::Removed(e) => Some(&e.resource_uri),
            Self::HttpCmdProcessed(_) => None,
        }
    }

    /// The completion payload, if this is one.
    #[must_use]
    pub const fn as_completion(&self) -> Option<&HttpCmdProcessed> {
        match self {
            Self::HttpCmdProcessed(c) => Some(c),
            _ => None,
        }
    }
}

impl ApplyEvent for ResourceEvent {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        match self {
            Self::Created(e) => e.apply_to(aggregate),
            Self::PropertiesUpdated(e) => e.apply_to(aggregate),
            Self::PropertyRemoved(e) => e.apply_to(aggregate),
            Self::PrivilegesUpdated(e) => e.apply_to(aggregate),
            Self::CollectionMemberAdded(e) => MemberAdded(e).apply_to(aggregate),
            Self::CollectionMemberRemoved(e) => MemberRemoved(e).apply_to(aggregate),
            Self::Removed(e) => e.apply_to(aggregate),
            Self::HttpCmdProcessed(e) => e.apply_to(aggregate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCreated {
    pub resource_uri: String,
    pub properties: PropertyMap,
    #[serde(default)]
    pub private: Map<String, Value>,
    pub privileges: PrivilegeMap,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub collection: bool,
}

impl ApplyEvent for ResourceCreated {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        aggregate.state = ResourceState::Created;
        aggregate.resource_uri.clone_from(&self.resource_uri);
        aggregate.properties.clone_from(&self.properties);
        aggregate.private.clone_from(&self.private);
        aggregate.privileges.clone_from(&self.privileges);
        aggregate.headers.clone_from(&self.headers);
        aggregate.plugin.clone_from(&self.plugin);
        aggregate.collection = self.collection;
    }
}

/// Only the properties that actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertiesUpdated {
    pub resource_uri: String,
    pub properties: PropertyMap,
    #[serde(default)]
    pub private: Map<String, Value>,
}

impl ApplyEvent for PropertiesUpdated {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        for (name, property) in &self.properties {
            aggregate.properties.insert(name.clone(), property.clone());
        }
        for (key, value) in &self.private {
            aggregate.private.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRemoved {
    pub resource_uri: String,
    pub property_name: String,
}

impl ApplyEvent for PropertyRemoved {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        aggregate.properties.remove(&self.property_name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegesUpdated {
    pub resource_uri: String,
    pub privileges: PrivilegeMap,
}

impl ApplyEvent for PrivilegesUpdated {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        aggregate.privileges.clone_from(&self.privileges);
    }
}

/// A member URI joined or left a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMemberChanged {
    pub resource_uri: String,
    pub member_uri: String,
}

struct MemberAdded<'a>(&'a CollectionMemberChanged);
struct MemberRemoved<'a>(&'a CollectionMemberChanged);

fn member_entry(uri: &str) -> Property {
    let mut link = PropertyMap::new();
    link.insert(ODATA_ID.to_string(), Property::scalar(uri));
    Property {
        value: PropertyValue::Object(link),
        meta: None,
    }
}

fn write_members(aggregate: &mut RedfishResourceAggregate, members: Vec<Property>) {
    let count = members.len();
    aggregate.properties.insert(
        MEMBERS.to_string(),
        Property {
            value: PropertyValue::Array(members),
            meta: None,
        },
    );
    aggregate
        .properties
        .insert(MEMBERS_COUNT.to_string(), Property::scalar(count));
}

impl ApplyEvent for MemberAdded<'_> {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        let mut members = aggregate.member_entries();
        members.push(member_entry(&self.0.member_uri));
        write_members(aggregate, members);
    }
}

impl ApplyEvent for MemberRemoved<'_> {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        let members = aggregate
            .member_entries()
            .into_iter()
            .filter(|m| {
                m.children()
                    .and_then(|c| c.get(ODATA_ID))
                    .and_then(Property::as_str)
                    != Some(self.0.member_uri.as_str())
            })
            .collect();
        write_members(aggregate, members);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRemoved {
    pub resource_uri: String,
}

impl ApplyEvent for ResourceRemoved {
    fn apply_to(&self, aggregate: &mut RedfishResourceAggregate) {
        aggregate.state = ResourceState::Removed;
    }
}

/// Completion of an HTTP-originated command: everything needed to
/// render the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpCmdProcessed {
    #[serde(rename = "CommandID")]
    pub command_id: CommandId,
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub results: Value,
}

impl ApplyEvent for HttpCmdProcessed {
    fn apply_to(&self, _aggregate: &mut RedfishResourceAggregate) {}
}
