//! Sync API endpoints for controlling the orchestrator and inspecting gaps.

use crate::error::AppError;
use crate::services::gap_detector::MAX_RECENT_WINDOW_DAYS;
use crate::types::{
    AnalysisReport, BackwardGap, BackwardReport, GapAnalysis, GlobalDataStats, RecentGapCheck,
    SyncStatusReport,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Create sync API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/start", post(start_sync))
        .route("/stop", post(stop_sync))
        .route("/restart", post(restart_sync))
        .route("/symbols", put(update_symbols))
        .route("/analysis", get(get_last_analysis))
        .route("/gaps/:symbol", get(get_gaps))
        .route("/recent/:symbol", get(get_recent_gaps))
        .route("/backward", get(get_backward_all))
        .route("/backward/:symbol", get(get_backward))
        .route("/stats", get(get_global_stats))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SymbolsBody {
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub days: Option<u32>,
}

/// GET /api/sync/status
async fn get_status(State(state): State<AppState>) -> Json<SyncStatusReport> {
    Json(state.orchestrator.status().await)
}

/// POST /api/sync/start
async fn start_sync(State(state): State<AppState>) -> Result<Json<SessionResponse>, AppError> {
    let session_id = state.orchestrator.start().await?;
    Ok(Json(SessionResponse { session_id }))
}

/// POST /api/sync/stop
async fn stop_sync(State(state): State<AppState>) -> Result<Json<StopResponse>, AppError> {
    state.orchestrator.stop().await?;
    Ok(Json(StopResponse { stopped: true }))
}

/// POST /api/sync/restart
async fn restart_sync(State(state): State<AppState>) -> Result<Json<SessionResponse>, AppError> {
    let session_id = state.orchestrator.restart().await?;
    Ok(Json(SessionResponse { session_id }))
}

/// PUT /api/sync/symbols
async fn update_symbols(
    State(state): State<AppState>,
    Json(body): Json<SymbolsBody>,
) -> Result<Json<SymbolsBody>, AppError> {
    let symbols = state.orchestrator.update_symbols(&body.symbols).await?;
    Ok(Json(SymbolsBody { symbols }))
}

/// GET /api/sync/analysis
async fn get_last_analysis(State(state): State<AppState>) -> Result<Json<AnalysisReport>, AppError> {
    state
        .orchestrator
        .last_analysis()
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No analysis has run yet".to_string()))
}

/// GET /api/sync/gaps/:symbol
async fn get_gaps(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<GapAnalysis>, AppError> {
    let analysis = state
        .orchestrator
        .detector()
        .analyze_gaps(&symbol.to_uppercase(), state.config.sync.target_years)
        .await?;
    Ok(Json(analysis))
}

/// GET /api/sync/recent/:symbol?days=N
async fn get_recent_gaps(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentGapCheck>, AppError> {
    let days = query.days.unwrap_or(state.config.sync.recent_window_days);
    if days == 0 || days > MAX_RECENT_WINDOW_DAYS {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_RECENT_WINDOW_DAYS
        )));
    }
    let check = state
        .orchestrator
        .detector()
        .check_recent_gaps(&symbol.to_uppercase(), days)
        .await?;
    Ok(Json(check))
}

/// GET /api/sync/backward
async fn get_backward_all(State(state): State<AppState>) -> Json<BackwardReport> {
    let symbols = state.orchestrator.monitored_symbols().await;
    let report = state
        .orchestrator
        .detector()
        .analyze_all_backward(&symbols, state.config.sync.target_years)
        .await;
    Json(report)
}

/// GET /api/sync/backward/:symbol
async fn get_backward(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<BackwardGap>, AppError> {
    let gap = state
        .orchestrator
        .detector()
        .analyze_backward(&symbol.to_uppercase(), state.config.sync.target_years)
        .await?;
    Ok(Json(gap))
}

/// GET /api/sync/stats
async fn get_global_stats(State(state): State<AppState>) -> Json<GlobalDataStats> {
    let symbols = state.orchestrator.monitored_symbols().await;
    let stats = state
        .orchestrator
        .detector()
        .global_stats(&symbols, state.config.sync.target_years)
        .await;
    Json(stats)
}
