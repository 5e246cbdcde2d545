//! Internal command endpoint: POST /api/{command}
//!
//! Decodes the body straight into the named command and runs it on the
//! command bus. No search path and no privilege check; this is an
//! operator injection point.

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use redfishd_domain::DomainError;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Response for an accepted command
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    command: String,
    aggregate_id: String,
}

/// POST /api/{command}
pub async fn run_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
    body: Bytes,
) -> Result<Json<CommandAccepted>> {
    let body: Value =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedJson(e.to_string()))?;

    let aggregate_id = state
        .service
        .execute_internal(&command, body)
        .await
        .map_err(|e| match e {
            DomainError::CommandNotFound { .. } => {
                AppError::NotFound(format!("no internal command named '{command}'"))
            }
            DomainError::Parse { reason } => AppError::MalformedJson(reason),
            other if other.is_client_error() => AppError::BadRequest(other.to_string()),
            other => AppError::Domain(other),
        })?;

    info!(command = %command, aggregate_id = %aggregate_id, "Internal command applied");

    Ok(Json(CommandAccepted {
        command,
        aggregate_id: aggregate_id.to_string(),
    }))
}
