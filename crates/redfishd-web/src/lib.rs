//! redfishd web server
//!
//! HTTP surface over the Redfish service: the resource bridge, the
//! internal command endpoint and a health probe, with tower middleware for
//! tracing and the standard OData headers.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{Authenticator, StaticAccounts};
pub use error::{AppError, Result};
pub use server::run_server;
pub use state::AppState;

/// Create the router with its middleware stack.
pub fn create_router(state: AppState) -> Router {
    info!(server_name = state.server_name(), "Creating router");

    routes::routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(middleware::logging_middleware))
                .layer(from_fn_with_state(state.clone(), middleware::standard_headers)),
        )
        .with_state(state)
}

/// Web server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
