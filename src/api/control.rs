//! Remote control queue endpoints.

use crate::error::AppError;
use crate::types::{CommandAction, RemoteCommand};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Create control API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/commands", post(enqueue_command))
        .route("/commands/:id", get(get_command))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub action: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    #[serde(flatten)]
    pub command: RemoteCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Queue a command for the control poller.
///
/// POST /api/control/commands
async fn enqueue_command(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<CommandResponse>), AppError> {
    let action = CommandAction::parse(&request.action);
    if let CommandAction::Unknown(action) = &action {
        return Err(AppError::BadRequest(format!("unknown action '{}'", action)));
    }

    let id = state
        .store
        .enqueue_command(&action, request.payload.as_ref())?;
    let (command, error) = state
        .store
        .get_command(id)?
        .ok_or_else(|| AppError::Internal(format!("command {} vanished after insert", id)))?;

    Ok((StatusCode::CREATED, Json(CommandResponse { command, error })))
}

/// Look up a command and whether it has been processed.
///
/// GET /api/control/commands/:id
async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommandResponse>, AppError> {
    let (command, error) = state
        .store
        .get_command(id)?
        .ok_or_else(|| AppError::NotFound(format!("Command not found: {}", id)))?;
    Ok(Json(CommandResponse { command, error }))
}
