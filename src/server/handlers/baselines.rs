use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TestNameQuery {
    test: Option<String>,
}

/// `GET /api/baselines` — optionally scoped to one test via `?test=`.
pub async fn list_baselines(
    State(state): State<AppState>,
    Query(query): Query<TestNameQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let baselines = state.baselines.list_baselines(query.test.as_deref()).await?;
    Ok(Json(json!({ "count": baselines.len(), "baselines": baselines })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBaselineBody {
    run_id: String,
    name: String,
    #[serde(default)]
    description: String,
}

/// `POST /api/baselines` — snapshots `run_id` under `name`; not idempotent,
/// a repeated call with the same name conflicts against the existing one.
pub async fn create_baseline(
    State(state): State<AppState>,
    Json(body): Json<CreateBaselineBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let run = state.storage.get_run(&body.run_id).await?;
    let baseline = state
        .baselines
        .set_baseline(&run, &body.name, &body.description)
        .await?;
    state
        .hub
        .notify_baseline_updated(&baseline.name, &baseline.run_id, &baseline.test_name);
    Ok(Json(serde_json::to_value(&baseline).unwrap()))
}

/// `GET /api/baselines/{name}`.
pub async fn get_baseline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let baseline = state.baselines.get_baseline(&name).await?;
    Ok(Json(serde_json::to_value(&baseline).unwrap()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateBaselineBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_active: Option<bool>,
}

/// `PUT /api/baselines/{name}` — rename/redescribe without re-snapshotting,
/// and optionally deactivate. Renames are idempotent.
pub async fn update_baseline(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateBaselineBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut baseline = state
        .baselines
        .update_baseline(&name, body.name.as_deref(), body.description.as_deref())
        .await?;
    if body.is_active == Some(false) {
        baseline = state.baselines.deactivate_baseline(&baseline.name).await?;
    }
    state
        .hub
        .notify_baseline_updated(&baseline.name, &baseline.run_id, &baseline.test_name);
    Ok(Json(serde_json::to_value(&baseline).unwrap()))
}

/// `DELETE /api/baselines/{name}` — idempotent.
pub async fn delete_baseline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.baselines.delete_baseline(&name).await?;
    Ok(Json(json!({ "deleted": name })))
}
