//! The Redfish bridge: every request not claimed by another route.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Json, Response},
};
use redfishd_domain::{HttpVerb, ResourceRequest, ResourceResponse};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::state::AppState;

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Authenticate, hand the request to the dispatcher and render its
/// completion.
pub async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let verb = method
        .as_str()
        .parse::<HttpVerb>()
        .map_err(|_| AppError::MethodNotAllowed(method.to_string()))?;
    let principal = state
        .authenticator
        .authenticate(&headers)
        .ok_or(AppError::BadCredentials)?;

    let mut request = ResourceRequest::new(verb, uri.path())
        .with_principal(principal)
        .with_body(body.to_vec());
    request.query = query;
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }

    let response = state.service.dispatch(request).await?;
    Ok(render(response))
}

fn render(response: ResourceResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut rendered = match response.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };

    let headers = rendered.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid completion header"),
        }
    }

    rendered
}
