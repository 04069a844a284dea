use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::AppError;
use crate::models::RunFilter;
use crate::server::AppState;

/// `GET /health` — liveness plus a dependency check against the storage
/// port.
pub async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.storage.ping().await?;
    Ok(Json(json!({ "status": "healthy" })))
}

/// `GET /api/status` — detailed counters: test/run totals plus live
/// WebSocket hub stats.
pub async fn api_status(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let test_names = state.storage.list_test_names().await?;
    let summary = state
        .storage
        .get_summary(RunFilter {
            limit: RunFilter::MAX_LIMIT,
            ..Default::default()
        })
        .await?;
    let uptime_seconds = (chrono::Utc::now() - state.started_at).num_seconds();

    Ok(Json(json!({
        "status": "ok",
        "uptime_seconds": uptime_seconds,
        "test_count": test_names.len(),
        "total_runs": summary.total_runs,
        "connected_ws_clients": state.hub.connected_client_count().await,
        "dropped_broadcasts": state.hub.dropped_broadcast_count(),
    })))
}
