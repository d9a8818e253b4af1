use crate::types::SyncState;
use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sync_state: SyncState,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sync_state: state.orchestrator.state().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
