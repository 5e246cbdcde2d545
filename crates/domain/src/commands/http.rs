//! Default HTTP verb commands, registered under
//! `http:RedfishResource:<VERB>`.
//!
//! Each one stores the caller, defers authorization to the resource's
//! privilege map, and finishes by publishing an `HTTPCmdProcessed`
//! notification carrying the response.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redfishd_events::{AggregateId, CommandId};
use serde_json::{Map, Value, json};

use crate::aggregate::RedfishResourceAggregate;
use crate::command::{
    AggIdSetter, CmdIdSetter, Command, CommandContext, CommandOutcome, HttpRequestParser,
    UserDetailsSetter,
};
use crate::dispatcher::ResourceRequest;
use crate::error::{DomainError, Result};
use crate::events::{ApplyEvent, HttpCmdProcessed, PropertiesUpdated, ResourceEvent, ResourceRemoved};
use crate::messages::{EXTENDED_INFO, error_body, property_failure};
use crate::privileges::{AuthAction, HttpVerb, Principal};
use crate::property::{MEMBERS, MEMBERS_COUNT};

/// Key prefix of the default commands.
pub const DEFAULT_PREFIX: &str = "http:RedfishResource";

/// Registry key of the default command for `verb`.
#[must_use]
pub fn default_key(verb: HttpVerb) -> String {
    format!("{DEFAULT_PREFIX}:{verb}")
}

/// Identity injected by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCommandState {
    pub aggregate_id: AggregateId,
    pub command_id: CommandId,
    pub principal: Principal,
}

impl Default for HttpCommandState {
    fn default() -> Self {
        Self {
            aggregate_id: AggregateId::default(),
            command_id: CommandId::default(),
            principal: Principal::anonymous(),
        }
    }
}

impl HttpCommandState {
    fn completion(
        &self,
        aggregate: &RedfishResourceAggregate,
        status_code: u16,
        extra_headers: BTreeMap<String, String>,
        results: Value,
    ) -> ResourceEvent {
        let mut headers = aggregate.headers().clone();
        headers.extend(extra_headers);
        ResourceEvent::HttpCmdProcessed(HttpCmdProcessed {
            command_id: self.command_id,
            status_code,
            headers,
            results,
        })
    }
}

macro_rules! http_capabilities {
    ($ty:ty) => {
        impl CmdIdSetter for $ty {
            fn set_cmd_id(&mut self, command_id: CommandId) {
                self.state.command_id = command_id;
            }
        }

        impl AggIdSetter for $ty {
            fn set_agg_id(&mut self, aggregate_id: AggregateId) {
                self.state.aggregate_id = aggregate_id;
            }
        }

        impl UserDetailsSetter for $ty {
            fn set_user_details(&mut self, principal: &Principal) -> AuthAction {
                self.state.principal = principal.clone();
                AuthAction::CheckMaster
            }
        }
    };
}

macro_rules! capability_accessors {
    () => {
        fn as_cmd_id_setter(&mut self) -> Option<&mut dyn CmdIdSetter> {
            Some(self)
        }

        fn as_agg_id_setter(&mut self) -> Option<&mut dyn AggIdSetter> {
            Some(self)
        }

        fn as_user_details_setter(&mut self) -> Option<&mut dyn UserDetailsSetter> {
            Some(self)
        }
    };
}

/// GET and HEAD. HEAD renders the same headers without a body.
#[derive(Debug, Clone, Default)]
pub struct GetRedfishResource {
    pub state: HttpCommandState,
    pub head: bool,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

impl GetRedfishResource {
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn head() -> Self {
        Self {
            head: true,
            ..Self::default()
        }
    }
}

http_capabilities!(GetRedfishResource);

impl HttpRequestParser for GetRedfishResource {
    fn parse_http_request(&mut self, request: &ResourceRequest) -> Result<()> {
        self.top = parse_count(request, "$top")?;
        self.skip = parse_count(request, "$skip")?;
        Ok(())
    }
}

fn parse_count(request: &ResourceRequest, name: &str) -> Result<Option<usize>> {
    request
        .query_param(name)
        .map(|raw| {
            raw.parse::<usize>().map_err(|_| {
                DomainError::parse(format!("query option {name} must be a non-negative integer, got '{raw}'"))
            })
        })
        .transpose()
}

/// Page `Members` in place. The count keeps the full size.
fn page_members(body: &mut Map<String, Value>, uri: &str, top: Option<usize>, skip: Option<usize>) {
    if top.is_none() && skip.is_none() {
        return;
    }
    let Some(Value::Array(members)) = body.get_mut(MEMBERS) else {
        return;
    };

    let total = members.len();
    let skip = skip.unwrap_or(0).min(total);
    let take = top.unwrap_or(total);
    let page: Vec<Value> = members.drain(..).skip(skip).take(take).collect();
    let next = skip.saturating_add(page.len());
    *members = page;

    body.insert(MEMBERS_COUNT.to_string(), json!(total));
    if take > 0 && next < total {
        body.insert(
            "Members@odata.nextLink".to_string(),
            json!(format!("{uri}?$skip={next}&$top={take}")),
        );
    }
}

#[async_trait]
impl Command for GetRedfishResource {
    fn command_type(&self) -> &'static str {
        if self.head {
            "http:RedfishResource:HEAD"
        } else {
            "http:RedfishResource:GET"
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.state.aggregate_id
    }

    async fn handle(
        &self,
        ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        let mut body = ctx.resolver.render(aggregate).await;
        page_members(&mut body, aggregate.resource_uri(), self.top, self.skip);

        let results = if self.head {
            Value::Null
        } else {
            Value::Object(body)
        };

        Ok(CommandOutcome::default().notify(self.state.completion(
            aggregate,
            200,
            BTreeMap::new(),
            results,
        )))
    }

    capability_accessors!();

    fn as_http_request_parser(&mut self) -> Option<&mut dyn HttpRequestParser> {
        Some(self)
    }
}

/// OPTIONS: lists the verbs the resource has requirements for.
#[derive(Debug, Clone, Default)]
pub struct OptionsRedfishResource {
    pub state: HttpCommandState,
}

http_capabilities!(OptionsRedfishResource);

#[async_trait]
impl Command for OptionsRedfishResource {
    fn command_type(&self) -> &'static str {
        "http:RedfishResource:OPTIONS"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.state.aggregate_id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        let allow = aggregate
            .privileges()
            .allowed_verbs()
            .iter()
            .map(|verb| verb.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(CommandOutcome::default().notify(self.state.completion(
            aggregate,
            200,
            BTreeMap::from([("Allow".to_string(), allow)]),
            Value::Null,
        )))
    }

    capability_accessors!();
}

/// PATCH: static literals are diffed into `PropertiesUpdated`,
/// meta-backed properties go to their controller.
#[derive(Debug, Clone, Default)]
pub struct PatchRedfishResource {
    pub state: HttpCommandState,
    pub body: Map<String, Value>,
}

http_capabilities!(PatchRedfishResource);

impl HttpRequestParser for PatchRedfishResource {
    fn parse_http_request(&mut self, request: &ResourceRequest) -> Result<()> {
        self.body = match request.json_body()? {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(DomainError::parse("PATCH body must be a JSON object")),
        };
        Ok(())
    }
}

#[async_trait]
impl Command for PatchRedfishResource {
    fn command_type(&self) -> &'static str {
        "http:RedfishResource:PATCH"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.state.aggregate_id
    }

    async fn handle(
        &self,
        ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        let outcome = ctx
            .resolver
            .resolve_patch(aggregate, self.body.clone(), &self.state.principal)
            .await;

        if !self.body.is_empty() && !outcome.any_accepted() {
            let status = match outcome.failures.as_slice() {
                [only] => only.status_code,
                _ => 400,
            };
            let failures = outcome.failures.iter().map(property_failure).collect();
            let body = error_body(
                "PropertyValueError",
                "None of the submitted properties could be updated.",
                failures,
            );
            return Ok(CommandOutcome::default().notify(self.state.completion(
                aggregate,
                status,
                BTreeMap::new(),
                body,
            )));
        }

        let mut events = Vec::new();
        let mut preview = aggregate.clone();
        if !outcome.updates.is_empty() {
            let updated = ResourceEvent::PropertiesUpdated(PropertiesUpdated {
                resource_uri: aggregate.resource_uri().to_string(),
                properties: outcome.updates,
                private: Map::new(),
            });
            updated.apply_to(&mut preview);
            events.push(updated);
        }

        let mut body = ctx.resolver.render(&preview).await;
        if !outcome.failures.is_empty() {
            body.insert(
                EXTENDED_INFO.to_string(),
                Value::Array(outcome.failures.iter().map(property_failure).collect()),
            );
        }

        Ok(CommandOutcome {
            events,
            notifications: Vec::new(),
        }
        .notify(self.state.completion(aggregate, 200, BTreeMap::new(), Value::Object(body))))
    }

    capability_accessors!();

    fn as_http_request_parser(&mut self) -> Option<&mut dyn HttpRequestParser> {
        Some(self)
    }
}

/// DELETE: removes the resource.
#[derive(Debug, Clone, Default)]
pub struct DeleteRedfishResource {
    pub state: HttpCommandState,
}

http_capabilities!(DeleteRedfishResource);

#[async_trait]
impl Command for DeleteRedfishResource {
    fn command_type(&self) -> &'static str {
        "http:RedfishResource:DELETE"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.state.aggregate_id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        aggregate: &RedfishResourceAggregate,
    ) -> Result<CommandOutcome> {
        aggregate.ensure_live()?;

        Ok(CommandOutcome::events(vec![ResourceEvent::Removed(ResourceRemoved {
            resource_uri: aggregate.resource_uri().to_string(),
        })])
        .notify(self.state.completion(aggregate, 200, BTreeMap::new(), json!({}))))
    }

    capability_accessors!();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use crate::commands::resource::CreateRedfishResource;
    use crate::meta::MetaResolver;
    use crate::plugin::PluginRegistry;
    use crate::tree::ResourceTree;
    use redfishd_events::Event;
    use std::sync::Arc;

    fn ctx() -> CommandContext {
        CommandContext {
            tree: Arc::new(ResourceTree::new()),
            resolver: MetaResolver::new(Arc::new(PluginRegistry::new())),
        }
    }

    async fn live(ctx: &CommandContext, create: CreateRedfishResource) -> RedfishResourceAggregate {
        let outcome = create
            .handle(ctx, &RedfishResourceAggregate::new(create.id))
            .await
            .unwrap();
        let events: Vec<_> = outcome
            .events
            .into_iter()
            .map(|payload| Event::new(create.id, 1, payload))
            .collect();
        RedfishResourceAggregate::from_events(create.id, &events)
    }

    fn completion(outcome: &CommandOutcome) -> &HttpCmdProcessed {
        match outcome.notifications.as_slice() {
            [ResourceEvent::HttpCmdProcessed(done)] => done,
            other => panic!("expected one completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_render_resource_on_get() {
        let ctx = ctx();
        let aggregate = live(
            &ctx,
            CreateRedfishResource::new("/redfish/v1/Systems/1", "#ComputerSystem.v1_5_0.ComputerSystem", "")
                .with_properties(json!({"Name": "one"}))
                .with_private("secret", "hunter2")
                .with_header("Location", "/redfish/v1/Systems/1"),
        )
        .await;
        let mut cmd = GetRedfishResource::get();
        cmd.set_cmd_id(CommandId::new());

        let outcome = cmd.handle(&ctx, &aggregate).await.unwrap();
        let done = completion(&outcome);

        assert!(outcome.events.is_empty());
        assert_eq!(done.command_id, cmd.state.command_id);
        assert_eq!(done.status_code, 200);
        assert_eq!(done.results["Name"], "one");
        assert!(done.results.get("secret").is_none());
        assert_eq!(done.headers["Location"], "/redfish/v1/Systems/1");
    }

    #[tokio::test]
    async fn should_page_collection_members() {
        let mut body = Map::new();
        body.insert(
            MEMBERS.into(),
            json!([{"@odata.id": "/c/1"}, {"@odata.id": "/c/2"}, {"@odata.id": "/c/3"}]),
        );

        page_members(&mut body, "/c", Some(1), Some(1));

        assert_eq!(body[MEMBERS], json!([{"@odata.id": "/c/2"}]));
        assert_eq!(body[MEMBERS_COUNT], json!(3));
        assert_eq!(body["Members@odata.nextLink"], json!("/c?$skip=2&$top=1"));
    }

    #[tokio::test]
    async fn should_not_link_onwards_from_empty_page() {
        let mut body = Map::new();
        body.insert(MEMBERS.into(), json!([{"@odata.id": "/c/1"}, {"@odata.id": "/c/2"}]));

        page_members(&mut body, "/c", Some(0), None);

        assert_eq!(body[MEMBERS], json!([]));
        assert_eq!(body[MEMBERS_COUNT], json!(2));
        assert!(body.get("Members@odata.nextLink").is_none());
    }

    #[tokio::test]
    async fn should_list_allowed_verbs_on_options() {
        let ctx = ctx();
        let aggregate = live(&ctx, CreateRedfishResource::new("/redfish/v1", "", "")).await;

        let outcome = OptionsRedfishResource::default()
            .handle(&ctx, &aggregate)
            .await
            .unwrap();

        let allow = &completion(&outcome).headers["Allow"];
        assert!(allow.contains("GET"));
        assert!(allow.contains("PATCH"));
    }

    #[tokio::test]
    async fn should_emit_update_and_render_new_value_on_patch() {
        let ctx = ctx();
        let aggregate = live(
            &ctx,
            CreateRedfishResource::new("/redfish/v1/Managers/1", "", "")
                .with_properties(json!({"Name": "a", "Oem": {}})),
        )
        .await;
        let cmd = PatchRedfishResource {
            body: json!({"Name": "b", "Bogus": 1}).as_object().cloned().unwrap(),
            ..PatchRedfishResource::default()
        };

        let outcome = cmd.handle(&ctx, &aggregate).await.unwrap();
        let done = completion(&outcome);

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(done.status_code, 200);
        assert_eq!(done.results["Name"], "b");
        assert_eq!(done.results[EXTENDED_INFO][0]["MessageId"], "Base.1.0.PropertyUnknown");
    }

    #[tokio::test]
    async fn should_answer_400_when_nothing_applies() {
        let ctx = ctx();
        let aggregate = live(&ctx, CreateRedfishResource::new("/redfish/v1/Managers/2", "", "")).await;
        let cmd = PatchRedfishResource {
            body: json!({"Bogus": 1}).as_object().cloned().unwrap(),
            ..PatchRedfishResource::default()
        };

        let outcome = cmd.handle(&ctx, &aggregate).await.unwrap();

        assert!(outcome.events.is_empty());
        assert_eq!(completion(&outcome).status_code, 400);
    }

    #[tokio::test]
    async fn should_remove_on_delete() {
        let ctx = ctx();
        let aggregate = live(&ctx, CreateRedfishResource::new("/redfish/v1/Managers/3", "", "")).await;

        let outcome = DeleteRedfishResource::default()
            .handle(&ctx, &aggregate)
            .await
            .unwrap();

        assert!(matches!(outcome.events.as_slice(), [ResourceEvent::Removed(_)]));
        assert_eq!(completion(&outcome).results, json!({}));
    }

    #[test]
    fn should_defer_to_privilege_map() {
        let mut cmd = DeleteRedfishResource::default();
        let principal = Principal::new("admin", ["ConfigureManager"]);

        let action = cmd
            .as_user_details_setter()
            .map(|setter| setter.set_user_details(&principal));

        assert_eq!(action, Some(AuthAction::CheckMaster));
        assert_eq!(cmd.state.principal, principal);
    }
}
