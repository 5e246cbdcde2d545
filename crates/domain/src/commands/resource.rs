//! Resource lifecycle commands.
//!
//! These are the commands the internal API decodes by name; their JSON
//! field names follow the Redfish convention (`ID`, `ResourceURI`, ...).

use std::collections::BTreeMap;

use async_trait::async_trait;
use redfishd_events::AggregateId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::aggregate::{RedfishResourceAggregate, ResourceState};
use crate::command::{Command, CommandContext, CommandOutcome};
use crate::error::{DomainError, Result};
use crate::events::{
    CollectionMemberChanged, PrivilegesUpdated, PropertiesUpdated, PropertyRemoved,
    ResourceCreated, ResourceEvent, ResourceRemoved,
};
use crate::privileges::PrivilegeMap;
use crate::property::{
    MEMBERS, MEMBERS_COUNT, ODATA_CONTEXT, ODATA_ID, ODATA_TYPE, Property, PropertyMap,
    PropertyValue, is_reserved, parse_inputs, parse_object,
};
use crate::tree::normalize_uri;

/// Create a resource at a URI no live resource holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRedfishResource {
    #[serde(rename = "ID", default)]
    pub id: AggregateId,
    #[serde(rename = "ResourceURI")]
    pub resource_uri: String,
    #[serde(rename = "Type", default)]
    pub odata_type: String,
    #[serde(rename = "Context", default)]
    pub odata_context: String,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub collection: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub private: Map<String, Value>,
    #[serde(default)]
    pub privileges: Option<PrivilegeMap>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl CreateRedfishResource {
    pub const NAME: &'static str = "CreateRedfishResource";

    /// A create with a fresh aggregate id.
    pub fn new(
        resource_uri: impl Into<String>,
        odata_type: impl Into<String>,
        odata_context: impl Into<String>,
    ) -> Self {
        Self {
            id: AggregateId::new(),
            resource_uri: resource_uri.into(),
            odata_type: odata_type.into(),
            odata_context: odata_context.into(),
            plugin: None,
            collection: false,
            properties: Map::new(),
            private: Map::new(),
            privileges: None,
            headers: BTreeMap::new(),
        }
    }

    /// Builder-style: set the properties from a JSON object. Non-objects
    /// are ignored.
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        if let Value::Object(map) = properties {
            self.properties = map;
        }
        self
    }

    #[must_use]
    pub fn with_private(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.private.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    #[must_use]
    pub const fn as_collection(mut self) -> Self {
        self.collection = true;
        self
    }

    #[must_use]
    pub fn with_privileges(mut self, privileges: PrivilegeMap) -> Self {
        self.privileges = Some(privileges);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn uri(&self) -> &str {
        normalize_uri(&self.resource_uri)
    }

    fn initial_properties(&self) -> Result<PropertyMap> {
        let mut properties = parse_object(self.properties.clone())?;
        properties.retain(|name, _| {
            let keep = !is_reserved(name);
            if !keep {
                debug!(uri = %self.uri(), property = %name, "Dropping caller-supplied identity key");
            }
            keep
        });

        properties.insert(ODATA_ID.to_string(), Property::scalar(self.uri()));
        if !self.odata_type.is_empty() {
            properties.insert(ODATA_TYPE.to_string(), Property::scalar(self.odata_type.as_str()));
        }
        if !self.odata_context.is_empty() {
            properties.insert(
                ODATA_CONTEXT.to_string(),
                Property::scalar(self.odata_context.as_str()),
            );
        }
        if self.collection {
            properties.insert(
                MEMBERS.to_string(),
                Property {
                    value: PropertyValue::Array(Vec::new()),
                    meta: None,
                },
            );
            properties.insert(MEMBERS_COUNT.to_string(), Property::scalar(0));
        }

        Ok(properties)
    }
}

#[async_trait]
impl Command for CreateRedfishResource {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        match aggregate.state() {
            ResourceState::Uninitialized => {}
            ResourceState::Created => return Err(DomainError::already_exists(aggregate.resource_uri())),
            ResourceState::Removed => {
                return Err(DomainError::ResourceRemoved {
                    uri: aggregate.resource_uri().to_string(),
                });
            }
        }
        if !self.uri().starts_with('/') {
            return Err(DomainError::invalid(format!(
                "resource URI '{}' must be absolute",
                self.resource_uri
            )));
        }

        let properties = self.initial_properties()?;

        if !ctx.tree.claim(self.uri(), self.id) {
            return Err(DomainError::already_exists(self.uri()));
        }

        Ok(CommandOutcome::events(vec![ResourceEvent::Created(
            ResourceCreated {
                resource_uri: self.uri().to_string(),
                properties,
                private: self.private.clone(),
                privileges: self
                    .privileges
                    .clone()
                    .unwrap_or_else(|| PrivilegeMap::default_for_uri(self.uri())),
                headers: self.headers.clone(),
                plugin: self.plugin.clone(),
                collection: self.collection,
            },
        )]))
    }

    fn rollback(&self, ctx: &CommandContext) {
        ctx.tree.release(self.uri(), self.id);
    }
}

/// Merge properties into a live resource; only real changes are emitted.
/// Identity keys are silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateRedfishResourceProperties {
    #[serde(rename = "ID")]
    pub id: AggregateId,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub private: Map<String, Value>,
}

impl UpdateRedfishResourceProperties {
    pub const NAME: &'static str = "UpdateRedfishResourceProperties";

    /// An update from a JSON object. Non-objects update nothing.
    #[must_use]
    pub fn new(id: AggregateId, properties: Value) -> Self {
        Self {
            id,
            properties: match properties {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            private: Map::new(),
        }
    }
}

#[async_trait]
impl Command for UpdateRedfishResourceProperties {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        let mut changed = PropertyMap::new();
        for (name, input) in parse_inputs(self.properties.clone())? {
            if is_reserved(&name) {
                continue;
            }
            let existing = aggregate.property(&name);
            let merged = input.merged_with(existing);
            if existing != Some(&merged) {
                changed.insert(name, merged);
            }
        }

        let private: Map<String, Value> = self
            .private
            .iter()
            .filter(|(key, value)| aggregate.private().get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if changed.is_empty() && private.is_empty() {
            debug!(uri = %aggregate.resource_uri(), "Update changes nothing");
            return Ok(CommandOutcome::default());
        }

        Ok(CommandOutcome::events(vec![ResourceEvent::PropertiesUpdated(
            PropertiesUpdated {
                resource_uri: aggregate.resource_uri().to_string(),
                properties: changed,
                private,
            },
        )]))
    }
}

/// Remove one top-level property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveRedfishResourceProperty {
    #[serde(rename = "ID")]
    pub id: AggregateId,
    pub property: String,
}

impl RemoveRedfishResourceProperty {
    pub const NAME: &'static str = "RemoveRedfishResourceProperty";
}

#[async_trait]
impl Command for RemoveRedfishResourceProperty {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        if is_reserved(&self.property) {
            return Err(DomainError::invalid(format!(
                "'{}' identifies the resource and cannot be removed",
                self.property
            )));
        }
        if aggregate.property(&self.property).is_none() {
            return Err(DomainError::property_not_found(&self.property));
        }

        Ok(CommandOutcome::events(vec![ResourceEvent::PropertyRemoved(
            PropertyRemoved {
                resource_uri: aggregate.resource_uri().to_string(),
                property_name: self.property.clone(),
            },
        )]))
    }
}

/// Remove a live resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRedfishResource {
    #[serde(rename = "ID")]
    pub id: AggregateId,
}

impl RemoveRedfishResource {
    pub const NAME: &'static str = "RemoveRedfishResource";
}

#[async_trait]
impl Command for RemoveRedfishResource {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        Ok(CommandOutcome::events(vec![ResourceEvent::Removed(
            ResourceRemoved {
                resource_uri: aggregate.resource_uri().to_string(),
            },
        )]))
    }
}

/// Replace a resource's privilege map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateRedfishResourcePrivileges {
    #[serde(rename = "ID")]
    pub id: AggregateId,
    pub privileges: PrivilegeMap,
}

impl UpdateRedfishResourcePrivileges {
    pub const NAME: &'static str = "UpdateRedfishResourcePrivileges";
}

#[async_trait]
impl Command for UpdateRedfishResourcePrivileges {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        if aggregate.privileges() == &self.privileges {
            return Ok(CommandOutcome::default());
        }

        Ok(CommandOutcome::events(vec![ResourceEvent::PrivilegesUpdated(
            PrivilegesUpdated {
                resource_uri: aggregate.resource_uri().to_string(),
                privileges: self.privileges.clone(),
            },
        )]))
    }
}

/// Link a member into a collection. Adding a present member is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCollectionMember {
    #[serde(rename = "ID")]
    pub id: AggregateId,
    #[serde(rename = "MemberURI")]
    pub member_uri: String,
}

impl AddCollectionMember {
    pub const NAME: &'static str = "AddCollectionMember";
}

#[async_trait]
impl Command for AddCollectionMember {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        if !aggregate.is_collection() {
            return Err(DomainError::invalid(format!(
                "'{}' is not a collection",
                aggregate.resource_uri()
            )));
        }
        let member_uri = normalize_uri(&self.member_uri);
        if aggregate.member_uris().iter().any(|m| m == member_uri) {
            return Ok(CommandOutcome::default());
        }

        Ok(CommandOutcome::events(vec![ResourceEvent::CollectionMemberAdded(
            CollectionMemberChanged {
                resource_uri: aggregate.resource_uri().to_string(),
                member_uri: member_uri.to_string(),
            },
        )]))
    }
}

/// Unlink a member from a collection. Removing an absent member is a
/// no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveCollectionMember {
    #[serde(rename = "ID")]
    pub id: AggregateId,
    #[serde(rename = "MemberURI")]
    pub member_uri: String,
}

impl RemoveCollectionMember {
    pub const NAME: &'static str = "RemoveCollectionMember";
}

#[async_trait]
impl Command for RemoveCollectionMember {
    fn command_type(&self) -> &'static str {
        Self::NAME
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        let member_uri = normalize_uri(&self.member_uri);
        if !aggregate.member_uris().iter().any(|m| m == member_uri) {
            return Ok(CommandOutcome::default());
        }

        Ok(CommandOutcome::events(vec![
            ResourceEvent::CollectionMemberRemoved(CollectionMemberChanged {
                resource_uri: aggregate.resource_uri().to_string(),
                member_uri: member_uri.to_string(),
            }),
        ]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::meta::MetaResolver;
    use crate::plugin::PluginRegistry;
    use crate::tree::ResourceTree;
    use redfishd_events::Event;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> CommandContext {
        CommandContext {
            tree: Arc::new(ResourceTree::new()),
            resolver: MetaResolver::new(Arc::new(PluginRegistry::new())),
        }
    }

    async fn created(ctx: &CommandContext, cmd: &CreateRedfishResource) -> RedfishResourceAggregate {
        let fresh = RedfishResourceAggregate::new(cmd.id);
        let outcome = cmd.handle(ctx, &fresh).await.unwrap();
        let events: Vec<_> = outcome
            .events
            .into_iter()
            .zip(1_u64..)
            .map(|(payload, seq)| Event::new(cmd.id, seq, payload))
            .collect();
        RedfishResourceAggregate::from_events(cmd.id, &events)
    }

    #[tokio::test]
    async fn should_force_identity_keys_on_create() {
        let ctx = ctx();
        let cmd = CreateRedfishResource::new(
            "/redfish/v1/Systems/1/",
            "#ComputerSystem.v1_5_0.ComputerSystem",
            "/redfish/v1/$metadata#ComputerSystem.ComputerSystem",
        )
        .with_properties(json!({"@odata.id": "/spoofed", "Name": "System"}));

        let aggregate = created(&ctx, &cmd).await;

        assert_eq!(aggregate.odata_id(), Some("/redfish/v1/Systems/1"));
        assert_eq!(aggregate.odata_type(), Some("#ComputerSystem.v1_5_0.ComputerSystem"));
        assert_eq!(aggregate.privileges(), &PrivilegeMap::default_for_uri("/redfish/v1/Systems/1"));
        assert_eq!(ctx.tree.lookup("/redfish/v1/Systems/1"), Some(cmd.id));
    }

    #[tokio::test]
    async fn should_reject_second_create_at_same_uri() {
        let ctx = ctx();
        let first = CreateRedfishResource::new("/redfish/v1/Chassis/1", "", "");
        created(&ctx, &first).await;

        let second = CreateRedfishResource::new("/redfish/v1/Chassis/1", "", "");
        let result = second
            .handle(&ctx, &RedfishResourceAggregate::new(second.id))
            .await;

        assert!(matches!(result, Err(DomainError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn should_release_claim_on_rollback() {
        let ctx = ctx();
        let cmd = CreateRedfishResource::new("/redfish/v1/Chassis/2", "", "");
        cmd.handle(&ctx, &RedfishResourceAggregate::new(cmd.id))
            .await
            .unwrap();

        cmd.rollback(&ctx);

        assert!(!ctx.tree.contains("/redfish/v1/Chassis/2"));
    }

    #[tokio::test]
    async fn should_seed_members_for_collections() {
        let ctx = ctx();
        let cmd = CreateRedfishResource::new("/redfish/v1/Systems", "", "").as_collection();

        let aggregate = created(&ctx, &cmd).await;

        assert!(aggregate.member_uris().is_empty());
        assert_eq!(aggregate.property(MEMBERS_COUNT).unwrap().to_json(), json!(0));
    }

    #[tokio::test]
    async fn should_emit_nothing_for_identical_update() {
        let ctx = ctx();
        let create = CreateRedfishResource::new("/redfish/v1/Managers/1", "", "")
            .with_properties(json!({"Name": "BMC", "Status": {"State": "Enabled"}}));
        let aggregate = created(&ctx, &create).await;

        let update = UpdateRedfishResourceProperties::new(
            create.id,
            json!({"Name": "BMC", "Status": {"State": "Enabled"}, "@odata.id": "/x"}),
        );
        let outcome = update.handle(&ctx, &aggregate).await.unwrap();

        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn should_emit_only_changed_properties() {
        let ctx = ctx();
        let create = CreateRedfishResource::new("/redfish/v1/Managers/2", "", "")
            .with_properties(json!({"Name": "BMC", "Model": "X"}));
        let aggregate = created(&ctx, &create).await;

        let update = UpdateRedfishResourceProperties::new(create.id, json!({"Name": "BMC", "Model": "Y"}));
        let outcome = update.handle(&ctx, &aggregate).await.unwrap();

        assert_eq!(outcome.events.len(), 1);
        let changed = match &outcome.events[0] {
            ResourceEvent::PropertiesUpdated(updated) => updated.properties.clone(),
            _ => PropertyMap::new(),
        };
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["Model"].to_json(), json!("Y"));
    }

    #[tokio::test]
    async fn should_fail_removing_missing_property() {
        let ctx = ctx();
        let create = CreateRedfishResource::new("/redfish/v1/Managers/3", "", "");
        let aggregate = created(&ctx, &create).await;

        let result = RemoveRedfishResourceProperty {
            id: create.id,
            property: "Nope".into(),
        }
        .handle(&ctx, &aggregate)
        .await;

        assert!(matches!(result, Err(DomainError::PropertyNotFound { .. })));
    }

    #[tokio::test]
    async fn should_reject_commands_against_uncreated_aggregate() {
        let ctx = ctx();
        let id = AggregateId::new();

        let result = RemoveRedfishResource { id }
            .handle(&ctx, &RedfishResourceAggregate::new(id))
            .await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound { .. })));
    }

    #[tokio::test]
    async fn should_add_member_once() {
        let ctx = ctx();
        let create = CreateRedfishResource::new("/redfish/v1/Chassis", "", "").as_collection();
        let mut aggregate = created(&ctx, &create).await;
        let add = AddCollectionMember {
            id: create.id,
            member_uri: "/redfish/v1/Chassis/1".into(),
        };

        let outcome = add.handle(&ctx, &aggregate).await.unwrap();
        for payload in outcome.events {
            let next = aggregate.version() + 1;
            aggregate.apply(&Event::new(create.id, next, payload));
        }
        let again = add.handle(&ctx, &aggregate).await.unwrap();

        assert_eq!(aggregate.member_uris(), vec!["/redfish/v1/Chassis/1".to_string()]);
        assert!(again.is_empty());
    }

    #[test]
    fn should_decode_internal_json() {
        let cmd: CreateRedfishResource = serde_json::from_value(json!({
            "ResourceURI": "/redfish/v1/Systems/2",
            "Type": "#ComputerSystem.v1_5_0.ComputerSystem",
            "Collection": false,
            "Properties": {"Name": "two"},
            "Privileges": {"GET": ["Login"]},
        }))
        .unwrap();

        assert_eq!(cmd.resource_uri, "/redfish/v1/Systems/2");
        assert_eq!(cmd.properties["Name"], json!("two"));
        assert!(cmd.privileges.is_some());
    }
}
