//! Request dispatch: from (verb, URI, caller) to a rendered completion.
//!
//! The flow for every request is:
//!
//! 1. look the URI up in the tree (404 if absent)
//! 2. snapshot the aggregate, resolve its entity tag and build the
//!    command search path
//! 3. inject the correlation and aggregate ids
//! 4. authorize, then check `If-Match` / `If-None-Match`
//! 5. start listening for the completion, then parse the body
//! 6. hand the command to the bus, which repeats the privilege-map check
//!    under the aggregate lock, and wait for its completion
//!
//! Listening starts before dispatch because a command may complete
//! inside `CommandBus::handle` itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use redfishd_events::{AggregateId, CommandId, Error as EventsError, EventWaiter};
use serde_json::Value;
use tracing::{debug, warn};

use crate::aggregate::RedfishResourceAggregate;
use crate::command::Command;
use crate::error::{DomainError, Result};
use crate::events::{HTTP_CMD_PROCESSED, ResourceEvent};
use crate::handler::CommandBus;
use crate::privileges::{AuthAction, HttpVerb, Principal};
use crate::property::ODATA_ETAG;
use crate::registry::{CommandRegistry, search_path};
use crate::tree::{ResourceTree, normalize_uri};

/// Default bound on the completion wait.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP request, detached from any server framework.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub verb: HttpVerb,
    /// Path only, without the query string.
    pub uri: String,
    pub query: BTreeMap<String, String>,
    /// Header names are stored lower-case.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub principal: Principal,
}

impl ResourceRequest {
    /// An anonymous request without headers or body.
    pub fn new(verb: HttpVerb, uri: impl Into<String>) -> Self {
        Self {
            verb,
            uri: uri.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            principal: Principal::anonymous(),
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_json(self, body: &Value) -> Self {
        let bytes = body.to_string().into_bytes();
        self.with_body(bytes)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// The body as JSON; `None` when it is empty or whitespace.
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed JSON.
    pub fn json_body(&self) -> Result<Option<Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body)
            .map(Some)
            .map_err(|e| DomainError::parse(e.to_string()))
    }
}

/// What the completion event said to answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Routes requests to commands and waits for their completion.
pub struct RequestDispatcher {
    tree: Arc<ResourceTree>,
    commands: Arc<CommandBus>,
    registry: Arc<CommandRegistry>,
    waiter: EventWaiter<ResourceEvent>,
    timeout: Duration,
}

impl RequestDispatcher {
    /// `waiter` must already observe the bus the commands publish on.
    #[must_use]
    pub const fn new(
        tree: Arc<ResourceTree>,
        commands: Arc<CommandBus>,
        registry: Arc<CommandRegistry>,
        waiter: EventWaiter<ResourceEvent>,
    ) -> Self {
        Self {
            tree,
            commands,
            registry,
            waiter,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve, authorize and run one request.
    ///
    /// Dropping the returned future abandons the wait and releases the
    /// listener; a command already handed to the bus still commits.
    ///
    /// # Errors
    ///
    /// Every failure before dispatch is reported without side effects:
    /// `ResourceNotFound`, `CommandNotFound`, `Unauthorized`,
    /// `PreconditionFailed`, `NotModified`, `Parse`. After dispatch: the
    /// command's rejection, or `Timeout`.
    pub async fn dispatch(&self, request: ResourceRequest) -> Result<ResourceResponse> {
        let started = Instant::now();
        let uri = normalize_uri(&request.uri).to_string();

        let aggregate_id = self
            .tree
            .lookup(&uri)
            .ok_or_else(|| DomainError::resource_not_found(&uri))?;
        let (aggregate, etag) = self.snapshot(aggregate_id, &uri).await?;

        let path = search_path(
            &uri,
            aggregate.odata_type(),
            aggregate.odata_context(),
            aggregate.plugin_type(),
            request.verb,
        );
        let (key, mut command) = self
            .registry
            .resolve(&path)
            .ok_or(DomainError::CommandNotFound { candidates: path })?;

        let command_id = CommandId::new();
        inject_ids(command.as_mut(), command_id, aggregate_id);

        let action = authorize(command.as_mut(), &aggregate, &request, &uri)?;
        check_preconditions(etag.as_deref(), &request, &uri)?;

        let mut listener = self.waiter.listen_for_type(HTTP_CMD_PROCESSED, move |event| {
            event
                .payload
                .as_completion()
                .is_some_and(|done| done.command_id == command_id)
        })?;

        if let Some(parser) = command.as_http_request_parser() {
            parser.parse_http_request(&request)?;
        }

        debug!(verb = %request.verb, uri = %uri, command = %key, command_id = %command_id, "Dispatching");
        self.commands
            .handle_guarded(command.as_ref(), &|current: &RedfishResourceAggregate| {
                match action {
                    AuthAction::CheckMaster => {
                        check_privilege_map(current, request.verb, &request.principal, &uri)
                    }
                    AuthAction::Authorized | AuthAction::Unauthorized => Ok(()),
                }
            })
            .await?;

        let event = listener.wait_timeout(self.timeout).await.map_err(|e| match e {
            EventsError::Timeout { .. } => {
                warn!(verb = %request.verb, uri = %uri, command_id = %command_id, "Timed out waiting for completion");
                DomainError::Timeout { command_id }
            }
            other => other.into(),
        })?;
        listener.close();

        let Some(done) = event.payload.as_completion() else {
            return Err(DomainError::invalid("completion listener received a foreign event"));
        };

        let body = match (&done.results, request.verb) {
            (_, HttpVerb::Head) | (Value::Null, _) => None,
            (results, _) => Some(results.clone()),
        };
        let mut headers = done.headers.clone();
        if let Some(etag) = done.results.get(ODATA_ETAG).and_then(Value::as_str) {
            headers.insert("ETag".to_string(), etag.to_string());
        }

        debug!(
            verb = %request.verb,
            uri = %uri,
            status = done.status_code,
            elapsed_ms = started.elapsed().as_millis(),
            "Request completed"
        );

        Ok(ResourceResponse {
            status_code: done.status_code,
            headers,
            body,
        })
    }

    /// Copy the live aggregate and resolve its served entity tag, both
    /// under the aggregate lock.
    async fn snapshot(
        &self,
        aggregate_id: AggregateId,
        uri: &str,
    ) -> Result<(RedfishResourceAggregate, Option<String>)> {
        let repository = self.commands.repository();
        let aggregate = repository.lock(aggregate_id).await?;
        if !aggregate.is_live() {
            repository.evict(aggregate_id);
            return Err(DomainError::resource_not_found(uri));
        }
        let etag = self.commands.context().resolver.resolve_etag(&aggregate).await;
        Ok((aggregate.clone(), etag))
    }
}

fn inject_ids(command: &mut dyn Command, command_id: CommandId, aggregate_id: AggregateId) {
    if let Some(setter) = command.as_cmd_id_setter() {
        setter.set_cmd_id(command_id);
    }
    if let Some(setter) = command.as_agg_id_setter() {
        setter.set_agg_id(aggregate_id);
    }
}

/// The command decides first; `CheckMaster` (or no opinion) falls back to
/// the resource's privilege map. Returns the decision that let the call
/// through so the map check can be repeated under the aggregate lock.
fn authorize(
    command: &mut dyn Command,
    aggregate: &RedfishResourceAggregate,
    request: &ResourceRequest,
    uri: &str,
) -> Result<AuthAction> {
    let action = command
        .as_user_details_setter()
        .map_or(AuthAction::CheckMaster, |setter| {
            setter.set_user_details(&request.principal)
        });

    match action {
        AuthAction::Authorized => Ok(action),
        AuthAction::Unauthorized => Err(insufficient_privilege(request.verb, &request.principal, uri)),
        AuthAction::CheckMaster => {
            check_privilege_map(aggregate, request.verb, &request.principal, uri)?;
            Ok(action)
        }
    }
}

fn check_privilege_map(
    aggregate: &RedfishResourceAggregate,
    verb: HttpVerb,
    principal: &Principal,
    uri: &str,
) -> Result<()> {
    if aggregate.privileges().is_authorized(verb, principal) {
        Ok(())
    } else {
        Err(insufficient_privilege(verb, principal, uri))
    }
}

fn insufficient_privilege(verb: HttpVerb, principal: &Principal, uri: &str) -> DomainError {
    debug!(verb = %verb, uri = %uri, user = %principal.user_name, "Insufficient privilege");
    DomainError::Unauthorized {
        verb,
        uri: uri.to_string(),
        authenticated: !principal.is_anonymous(),
    }
}

fn etag_matches(header: &str, etag: &str) -> bool {
    let bare = |tag: &str| tag.trim().trim_start_matches("W/").trim_matches('"').to_string();
    let etag = bare(etag);
    header
        .split(',')
        .any(|candidate| candidate.trim() == "*" || bare(candidate) == etag)
}

fn check_preconditions(etag: Option<&str>, request: &ResourceRequest, uri: &str) -> Result<()> {
    let Some(etag) = etag else {
        return Ok(());
    };

    if request.verb.is_read() {
        let hit = request
            .header("If-None-Match")
            .is_some_and(|header| etag_matches(header, etag));
        if hit {
            return Err(DomainError::NotModified {
                uri: uri.to_string(),
                etag: etag.to_string(),
            });
        }
    } else {
        let miss = request
            .header("If-Match")
            .is_some_and(|header| !etag_matches(header, etag));
        if miss {
            return Err(DomainError::PreconditionFailed {
                uri: uri.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::privileges::PrivilegeMap;
    use serde_json::json;

    #[test]
    fn should_match_etags_loosely() {
        assert!(etag_matches("\"abc\"", "abc"));
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\", \"abc\"", "abc"));
        assert!(etag_matches("*", "anything"));
        assert!(!etag_matches("\"abd\"", "abc"));
    }

    #[test]
    fn should_compare_preconditions_against_given_etag() {
        let get = ResourceRequest::new(HttpVerb::Get, "/x").with_header("If-None-Match", "W/\"live\"");
        assert!(matches!(
            check_preconditions(Some("W/\"live\""), &get, "/x"),
            Err(DomainError::NotModified { .. })
        ));
        assert!(check_preconditions(None, &get, "/x").is_ok());

        let patch = ResourceRequest::new(HttpVerb::Patch, "/x").with_header("If-Match", "W/\"live\"");
        assert!(check_preconditions(Some("W/\"live\""), &patch, "/x").is_ok());
        assert!(matches!(
            check_preconditions(Some("W/\"other\""), &patch, "/x"),
            Err(DomainError::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn should_judge_privileges_from_the_aggregate_given() {
        let operator = Principal::new("operator", ["ConfigureManager"]);
        let mut aggregate = RedfishResourceAggregate::new(AggregateId::new());
        aggregate.privileges = PrivilegeMap::new().with(HttpVerb::Patch, ["ConfigureManager"]);
        assert!(check_privilege_map(&aggregate, HttpVerb::Patch, &operator, "/x").is_ok());

        aggregate.privileges = PrivilegeMap::new().with(HttpVerb::Patch, ["ConfigureUsers"]);
        let denied = check_privilege_map(&aggregate, HttpVerb::Patch, &operator, "/x");
        assert!(matches!(
            denied,
            Err(DomainError::Unauthorized {
                authenticated: true,
                ..
            })
        ));
    }

    #[test]
    fn should_treat_blank_body_as_absent() {
        let request = ResourceRequest::new(HttpVerb::Patch, "/x").with_body("  \n");
        assert!(request.json_body().unwrap().is_none());

        let request = request.with_body("{oops");
        assert!(matches!(request.json_body(), Err(DomainError::Parse { .. })));

        let request = request.with_json(&json!({"A": 1}));
        assert_eq!(request.json_body().unwrap(), Some(json!({"A": 1})));
    }

    #[test]
    fn should_look_headers_up_case_insensitively() {
        let request = ResourceRequest::new(HttpVerb::Get, "/x").with_header("If-None-Match", "\"1\"");

        assert_eq!(request.header("if-none-match"), Some("\"1\""));
    }
}
