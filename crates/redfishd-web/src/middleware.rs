//! Middleware helpers for the redfishd web server.
//!
//! - request logging with timing
//! - the standard OData response headers

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::{error, info, warn};

use crate::state::AppState;

const ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");

/// Request context captured before the request moves into the handler.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: axum::http::Method,
    pub uri: axum::http::Uri,
    pub start: Instant,
}

impl RequestContext {
    fn from_request(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            start: Instant::now(),
        }
    }

    fn log(&self, status: StatusCode) {
        let duration_ms = self.start.elapsed().as_millis();
        if status.is_server_error() {
            error!(
                method = %self.method,
                uri = %self.uri,
                status = status.as_u16(),
                duration_ms,
                "Server error occurred"
            );
        } else if status.is_client_error() {
            warn!(
                method = %self.method,
                uri = %self.uri,
                status = status.as_u16(),
                duration_ms,
                "Client error occurred"
            );
        } else {
            info!(
                method = %self.method,
                uri = %self.uri,
                status = status.as_u16(),
                duration_ms,
                "Request completed"
            );
        }
    }
}

/// Request logging middleware
///
/// Logs every request with its status and duration; 4xx at warn, 5xx at
/// error.
pub async fn logging_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    let ctx = RequestContext::from_request(&req);

    let response = next.run(req).await;

    ctx.log(response.status());

    Ok(response)
}

/// Adds `OData-Version`, `Cache-Control` and `Server` to every response.
pub async fn standard_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(ODATA_VERSION, HeaderValue::from_static("4.0"));
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-cache"));
    match HeaderValue::from_str(state.server_name()) {
        Ok(server) => {
            headers.insert(header::SERVER, server);
        }
        Err(_) => warn!(server_name = state.server_name(), "Server name is not a valid header value"),
    }

    response
}
