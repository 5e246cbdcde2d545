//! HTTP routes
//!
//! - `GET /health` - liveness probe
//! - `POST /api/{command}` - run an internal command decoded from the body
//! - anything else - the Redfish bridge, routed by the resource tree

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub mod api;
pub mod health;
pub mod redfish;

/// Route table without middleware; see [`crate::create_router`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/{command}", post(api::run_command))
        .fallback(redfish::handle)
}
