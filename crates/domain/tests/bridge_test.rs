//! End-to-end tests of the request bridge: routing, authorization,
//! completion correlation and the collection saga, driven through an
//! assembled [`RedfishService`].

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redfishd_core::Config;
use redfishd_domain::events::{PROPERTIES_UPDATED, RESOURCE_REMOVED};
use redfishd_domain::{
    AggIdSetter, CmdIdSetter, Command, CommandContext, CommandOutcome, CommandRegistry,
    CreateRedfishResource, DomainError, HttpCmdProcessed, HttpRequestParser, HttpVerb, Plugin,
    PluginError, Principal, Property, PropertyController, PropertyValue, RedfishResourceAggregate,
    RedfishService, ResourceEvent, ResourceRequest, ServiceBuilder,
    UpdateRedfishResourceProperties,
};
use redfishd_events::{AggregateId, CommandId, EventPattern};
use serde_json::{Map, Value, json};

const SYSTEMS: &str = "/redfish/v1/Systems";
const SYSTEM: &str = "/redfish/v1/Systems/1";

fn admin() -> Principal {
    Principal::new("admin", ["Login", "ConfigureManager"])
}

fn operator() -> Principal {
    Principal::new("operator", ["Login"])
}

async fn service() -> RedfishService {
    ServiceBuilder::new(Config::default()).build().await.unwrap()
}

async fn create_system(service: &RedfishService, properties: Value) -> AggregateId {
    service
        .execute(
            &CreateRedfishResource::new(SYSTEM, "#ComputerSystem.v1_5_0.ComputerSystem", "")
                .with_properties(properties),
        )
        .await
        .unwrap()
}

async fn get(service: &RedfishService, uri: &str) -> Value {
    service
        .dispatch(ResourceRequest::new(HttpVerb::Get, uri).with_principal(admin()))
        .await
        .unwrap()
        .body
        .unwrap()
}

/// Answers with a fixed marker so tests can tell which key was chosen.
#[derive(Default)]
struct Marker {
    name: &'static str,
    aggregate_id: AggregateId,
    command_id: CommandId,
    body: Value,
}

impl Marker {
    fn boxed(name: &'static str) -> Box<dyn Command> {
        Box::new(Self {
            name,
            ..Self::default()
        })
    }
}

impl CmdIdSetter for Marker {
    fn set_cmd_id(&mut self, command_id: CommandId) {
        self.command_id = command_id;
    }
}

impl AggIdSetter for Marker {
    fn set_agg_id(&mut self, aggregate_id: AggregateId) {
        self.aggregate_id = aggregate_id;
    }
}

impl HttpRequestParser for Marker {
    fn parse_http_request(&mut self, request: &ResourceRequest) -> redfishd_domain::Result<()> {
        self.body = request.json_body()?.unwrap_or(Value::Null);
        Ok(())
    }
}

#[async_trait]
impl Command for Marker {
    fn command_type(&self) -> &'static str {
        "test:Marker"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    async fn handle(
        &self,
        _ctx: &CommandContext,
        _aggregate: &RedfishResourceAggregate,
    ) -> redfishd_domain::Result<CommandOutcome> {
        Ok(CommandOutcome::default().notify(ResourceEvent::HttpCmdProcessed(HttpCmdProcessed {
            command_id: self.command_id,
            status_code: 200,
            headers: BTreeMap::new(),
            results: json!({"handler": self.name, "echo": self.body}),
        })))
    }

    fn as_cmd_id_setter(&mut self) -> Option<&mut dyn CmdIdSetter> {
        Some(self)
    }

    fn as_agg_id_setter(&mut self) -> Option<&mut dyn AggIdSetter> {
        Some(self)
    }

    fn as_http_request_parser(&mut self) -> Option<&mut dyn HttpRequestParser> {
        Some(self)
    }
}

/// Reads and writes `PowerState` from an in-memory switch.
struct PowerSwitch {
    on: AtomicI64,
}

impl PowerSwitch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            on: AtomicI64::new(1),
        })
    }

    fn state(&self) -> &'static str {
        if self.on.load(Ordering::SeqCst) == 1 { "On" } else { "Off" }
    }
}

#[async_trait]
impl Plugin for PowerSwitch {
    fn plugin_type(&self) -> &str {
        "SystemPower"
    }

    async fn refresh_property(
        &self,
        _aggregate: &RedfishResourceAggregate,
        slot: &mut Property,
        _verb: HttpVerb,
        _params: &Map<String, Value>,
        _body: Option<&Value>,
    ) -> Result<(), PluginError> {
        slot.value = PropertyValue::Scalar(json!(self.state()));
        Ok(())
    }

    fn controller(&self) -> Option<&dyn PropertyController> {
        Some(self)
    }
}

#[async_trait]
impl PropertyController for PowerSwitch {
    async fn update_request(
        &self,
        _aggregate: &RedfishResourceAggregate,
        _property: &str,
        value: &Value,
        _params: &Map<String, Value>,
        _principal: &Principal,
    ) -> Result<Value, PluginError> {
        match value.as_str() {
            Some("On") => self.on.store(1, Ordering::SeqCst),
            Some("Off") => self.on.store(0, Ordering::SeqCst),
            _ => return Err(PluginError::bad_request("PowerState must be On or Off")),
        }
        Ok(json!(self.state()))
    }
}

fn powered_system() -> Value {
    json!({
        "Name": "System One",
        "PowerState": "Unknown",
        "PowerState@meta": {
            "GET": {"plugin": "SystemPower"},
            "PATCH": {"controller": "SystemPower"}
        }
    })
}

#[tokio::test]
async fn should_reject_second_resource_at_same_uri() {
    let service = service().await;
    create_system(&service, json!({"Name": "first"})).await;

    let again = service
        .execute(&CreateRedfishResource::new(SYSTEM, "#ComputerSystem.v1_5_0.ComputerSystem", ""))
        .await;

    assert!(matches!(again, Err(DomainError::AlreadyExists { .. })));
    assert_eq!(get(&service, SYSTEM).await["Name"], json!("first"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_let_exactly_one_concurrent_create_win() {
    let service = Arc::new(service().await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .execute(
                    &CreateRedfishResource::new(SYSTEM, "#ComputerSystem.v1_5_0.ComputerSystem", "")
                        .with_properties(json!({"Name": format!("racer-{i}")})),
                )
                .await
                .is_ok()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(service.tree().len(), 1);
}

#[tokio::test]
async fn should_prefer_uri_key_over_type_key() {
    let registry = CommandRegistry::with_defaults();
    registry.register_http(format!("{SYSTEM}:GET"), || Marker::boxed("uri"));
    registry.register_http("#ComputerSystem.v1_5_0.ComputerSystem:GET", || Marker::boxed("type"));
    let service = ServiceBuilder::new(Config::default())
        .with_registry(registry)
        .build()
        .await
        .unwrap();
    create_system(&service, json!({})).await;
    service
        .execute(&CreateRedfishResource::new(
            "/redfish/v1/Systems/2",
            "#ComputerSystem.v1_5_0.ComputerSystem",
            "",
        ))
        .await
        .unwrap();

    assert_eq!(get(&service, SYSTEM).await["handler"], json!("uri"));
    assert_eq!(get(&service, "/redfish/v1/Systems/2").await["handler"], json!("type"));
}

#[tokio::test]
async fn should_report_missing_command_with_candidates() {
    let service = service().await;
    create_system(&service, json!({})).await;

    let result = service
        .dispatch(ResourceRequest::new(HttpVerb::Put, SYSTEM).with_principal(admin()))
        .await;

    let candidates = match result {
        Err(DomainError::CommandNotFound { candidates }) => candidates,
        other => panic!("expected CommandNotFound, got {other:?}"),
    };
    assert_eq!(candidates.first().map(String::as_str), Some("/redfish/v1/Systems/1:PUT"));
    assert_eq!(
        candidates.last().map(String::as_str),
        Some("http:RedfishResource:PUT")
    );
}

#[tokio::test]
async fn should_answer_not_found_for_unknown_uri() {
    let service = service().await;

    let result = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, "/redfish/v1/Nowhere").with_principal(admin()))
        .await;

    assert!(matches!(result, Err(DomainError::ResourceNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn should_deliver_each_completion_to_its_own_caller() {
    let registry = CommandRegistry::with_defaults();
    registry.register_http(format!("{SYSTEM}:POST"), || Marker::boxed("echo"));
    let service = Arc::new(
        ServiceBuilder::new(Config::default())
            .with_registry(registry)
            .build()
            .await
            .unwrap(),
    );
    create_system(&service, json!({})).await;

    let mut handles = Vec::new();
    for i in 0..1000 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let response = service
                .dispatch(
                    ResourceRequest::new(HttpVerb::Post, SYSTEM)
                        .with_principal(admin())
                        .with_json(&json!({"n": i})),
                )
                .await
                .unwrap();
            (i, response)
        }));
    }

    for handle in handles {
        let (i, response) = handle.await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.unwrap()["echo"]["n"], json!(i));
    }
    assert_eq!(service.waiter().listener_count(), 0);
}

#[tokio::test]
async fn should_authorize_when_any_required_privilege_is_held() {
    let service = service().await;
    create_system(&service, json!({"Name": "x"})).await;

    let read = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, SYSTEM).with_principal(operator()))
        .await;
    assert!(read.is_ok());

    let write = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(operator())
                .with_json(&json!({"Name": "y"})),
        )
        .await;
    assert!(matches!(
        write,
        Err(DomainError::Unauthorized { authenticated: true, .. })
    ));

    let anonymous = service.dispatch(ResourceRequest::new(HttpVerb::Get, SYSTEM)).await;
    assert!(matches!(
        anonymous,
        Err(DomainError::Unauthorized { authenticated: false, .. })
    ));
    assert_eq!(get(&service, SYSTEM).await["Name"], json!("x"));
}

#[tokio::test]
async fn should_serve_service_root_anonymously() {
    let service = service().await;
    service
        .execute(&CreateRedfishResource::new(
            "/redfish/v1",
            "#ServiceRoot.v1_0_0.ServiceRoot",
            "/redfish/v1/$metadata#ServiceRoot.ServiceRoot",
        ))
        .await
        .unwrap();

    let response = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, "/redfish/v1/"))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body.unwrap()["@odata.id"], json!("/redfish/v1"));
}

#[tokio::test]
async fn should_record_nothing_for_idempotent_update() {
    let service = service().await;
    let id = create_system(&service, json!({"Name": "same"})).await;
    let (_, mut updates) = service
        .bus()
        .subscribe_with_pattern(EventPattern::ByType(PROPERTIES_UPDATED.to_string()))
        .await;

    service
        .execute(&UpdateRedfishResourceProperties::new(id, json!({"Name": "same"})))
        .await
        .unwrap();
    assert!(updates.try_recv().is_err());

    service
        .execute(&UpdateRedfishResourceProperties::new(id, json!({"Name": "changed"})))
        .await
        .unwrap();
    assert!(updates.try_recv().is_ok());
}

#[tokio::test]
async fn should_compute_virtual_property_on_every_read() {
    let switch = PowerSwitch::new();
    let service = ServiceBuilder::new(Config::default())
        .with_plugin(Arc::clone(&switch) as Arc<dyn Plugin>)
        .build()
        .await
        .unwrap();
    create_system(&service, powered_system()).await;
    let (_, mut updates) = service
        .bus()
        .subscribe_with_pattern(EventPattern::ByType(PROPERTIES_UPDATED.to_string()))
        .await;

    assert_eq!(get(&service, SYSTEM).await["PowerState"], json!("On"));
    switch.on.store(0, Ordering::SeqCst);
    let body = get(&service, SYSTEM).await;

    assert_eq!(body["PowerState"], json!("Off"));
    assert!(body.get("PowerState@meta").is_none());
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn should_patch_through_controller() {
    let switch = PowerSwitch::new();
    let service = ServiceBuilder::new(Config::default())
        .with_plugin(Arc::clone(&switch) as Arc<dyn Plugin>)
        .build()
        .await
        .unwrap();
    create_system(&service, powered_system()).await;

    let response = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_json(&json!({"PowerState": "Off", "Name": "renamed"})),
        )
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    let body = response.body.unwrap();
    assert_eq!(body["PowerState"], json!("Off"));
    assert_eq!(body["Name"], json!("renamed"));
    assert_eq!(switch.state(), "Off");

    let rejected = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_json(&json!({"PowerState": "Sideways"})),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status_code, 400);
    assert_eq!(switch.state(), "Off");
}

#[tokio::test]
async fn should_reject_malformed_patch_body_before_dispatch() {
    let service = service().await;
    create_system(&service, json!({"Name": "x"})).await;

    let result = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_body("{not json"),
        )
        .await;

    assert!(matches!(result, Err(DomainError::Parse { .. })));
    assert_eq!(get(&service, SYSTEM).await["Name"], json!("x"));
}

#[tokio::test]
async fn should_tear_down_removed_resource() {
    let service = service().await;
    create_system(&service, json!({})).await;
    let mut removals = service
        .waiter()
        .listen_for_type(RESOURCE_REMOVED, |event| {
            event.payload.resource_uri() == Some(SYSTEM)
        })
        .unwrap();

    let response = service
        .dispatch(ResourceRequest::new(HttpVerb::Delete, SYSTEM).with_principal(admin()))
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);

    removals.wait_timeout(Duration::from_secs(1)).await.unwrap();
    assert!(removals.try_next().is_none());

    let after = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, SYSTEM).with_principal(admin()))
        .await;
    assert!(matches!(after, Err(DomainError::ResourceNotFound { .. })));
    assert!(!service.tree().contains(SYSTEM));
}

#[tokio::test]
async fn should_allow_recreating_removed_uri() {
    let service = service().await;
    create_system(&service, json!({"Name": "old"})).await;
    service
        .dispatch(ResourceRequest::new(HttpVerb::Delete, SYSTEM).with_principal(admin()))
        .await
        .unwrap();

    create_system(&service, json!({"Name": "new"})).await;

    assert_eq!(get(&service, SYSTEM).await["Name"], json!("new"));
}

async fn members(service: &RedfishService) -> Vec<Value> {
    get(service, SYSTEMS).await["Members"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

async fn wait_for_members(service: &RedfishService, expected: usize) -> Vec<Value> {
    for _ in 0..100 {
        let current = members(service).await;
        if current.len() == expected {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    members(service).await
}

#[tokio::test]
async fn should_keep_collection_members_in_step() {
    let service = service().await;
    service
        .execute(
            &CreateRedfishResource::new(
                SYSTEMS,
                "#ComputerSystemCollection.ComputerSystemCollection",
                "",
            )
            .as_collection(),
        )
        .await
        .unwrap();
    create_system(&service, json!({})).await;

    let added = wait_for_members(&service, 1).await;
    assert_eq!(added, vec![json!({"@odata.id": SYSTEM})]);
    assert_eq!(get(&service, SYSTEMS).await["Members@odata.count"], json!(1));

    service
        .dispatch(ResourceRequest::new(HttpVerb::Delete, SYSTEM).with_principal(admin()))
        .await
        .unwrap();

    assert!(wait_for_members(&service, 0).await.is_empty());
}

#[tokio::test]
async fn should_honour_conditional_headers() {
    let service = service().await;
    create_system(&service, json!({"@odata.etag": "W/\"7\"", "Name": "x"})).await;

    let cached = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Get, SYSTEM)
                .with_principal(admin())
                .with_header("If-None-Match", "W/\"7\""),
        )
        .await;
    assert!(matches!(cached, Err(DomainError::NotModified { .. })));

    let stale = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_header("If-Match", "\"6\"")
                .with_json(&json!({"Name": "y"})),
        )
        .await;
    assert!(matches!(stale, Err(DomainError::PreconditionFailed { .. })));

    let fresh = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, SYSTEM).with_principal(admin()))
        .await
        .unwrap();
    assert_eq!(fresh.headers.get("ETag").map(String::as_str), Some("W/\"7\""));
    assert_eq!(fresh.body.unwrap()["Name"], json!("x"));
}

/// Serves `W/"live-<generation>"` as the entity tag.
struct EtagSource {
    generation: AtomicI64,
}

#[async_trait]
impl Plugin for EtagSource {
    fn plugin_type(&self) -> &str {
        "Etag"
    }

    async fn refresh_property(
        &self,
        _aggregate: &RedfishResourceAggregate,
        slot: &mut Property,
        _verb: HttpVerb,
        _params: &Map<String, Value>,
        _body: Option<&Value>,
    ) -> Result<(), PluginError> {
        let generation = self.generation.load(Ordering::SeqCst);
        slot.value = PropertyValue::Scalar(json!(format!("W/\"live-{generation}\"")));
        Ok(())
    }
}

#[tokio::test]
async fn should_check_conditional_headers_against_served_etag() {
    let source = Arc::new(EtagSource {
        generation: AtomicI64::new(5),
    });
    let service = ServiceBuilder::new(Config::default())
        .with_plugin(Arc::clone(&source) as Arc<dyn Plugin>)
        .build()
        .await
        .unwrap();
    create_system(
        &service,
        json!({
            "Name": "x",
            "@odata.etag": "W/\"stale-0\"",
            "@odata.etag@meta": {"GET": {"plugin": "Etag"}}
        }),
    )
    .await;

    let served = service
        .dispatch(ResourceRequest::new(HttpVerb::Get, SYSTEM).with_principal(admin()))
        .await
        .unwrap();
    let etag = served.headers.get("ETag").cloned().unwrap();
    assert_eq!(etag, "W/\"live-5\"");

    let cached = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Get, SYSTEM)
                .with_principal(admin())
                .with_header("If-None-Match", etag.clone()),
        )
        .await;
    assert!(matches!(cached, Err(DomainError::NotModified { .. })));

    let stored = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Get, SYSTEM)
                .with_principal(admin())
                .with_header("If-None-Match", "W/\"stale-0\""),
        )
        .await
        .unwrap();
    assert_eq!(stored.status_code, 200);

    let patched = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_header("If-Match", etag.clone())
                .with_json(&json!({"Name": "y"})),
        )
        .await
        .unwrap();
    assert_eq!(patched.status_code, 200);

    source.generation.store(6, Ordering::SeqCst);
    let moved = service
        .dispatch(
            ResourceRequest::new(HttpVerb::Patch, SYSTEM)
                .with_principal(admin())
                .with_header("If-Match", etag)
                .with_json(&json!({"Name": "z"})),
        )
        .await;
    assert!(matches!(moved, Err(DomainError::PreconditionFailed { .. })));
}

#[tokio::test]
async fn should_omit_body_for_head() {
    let service = service().await;
    create_system(&service, json!({"Name": "x"})).await;

    let response = service
        .dispatch(ResourceRequest::new(HttpVerb::Head, SYSTEM).with_principal(admin()))
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.body.is_none());
}

#[tokio::test]
async fn should_decode_internal_commands_by_name() {
    let service = service().await;

    service
        .execute_internal(
            "CreateRedfishResource",
            json!({
                "ResourceURI": SYSTEM,
                "Type": "#ComputerSystem.v1_5_0.ComputerSystem",
                "Properties": {"Name": "decoded"}
            }),
        )
        .await
        .unwrap();
    assert_eq!(get(&service, SYSTEM).await["Name"], json!("decoded"));

    let unknown = service.execute_internal("FormatDisk", json!({})).await;
    assert!(matches!(unknown, Err(DomainError::CommandNotFound { .. })));
}
