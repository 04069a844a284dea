use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::RunFilter;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    days: u32,
}

fn default_days() -> u32 {
    30
}

/// `GET /api/tests` — every distinct test name seen across all runs.
pub async fn list_tests(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let tests = state.storage.list_test_names().await?;
    Ok(Json(json!({ "count": tests.len(), "tests": tests })))
}

/// `GET /api/tests/{t}/summary`.
pub async fn test_summary(
    State(state): State<AppState>,
    Path(test): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let summary = state
        .storage
        .get_summary(RunFilter {
            test_name: Some(test),
            limit: RunFilter::MAX_LIMIT,
            ..Default::default()
        })
        .await?;
    Ok(Json(serde_json::to_value(&summary).unwrap()))
}

/// `GET /api/tests/{t}/trends` — `days` in [1,365], default 30.
pub async fn test_trends(
    State(state): State<AppState>,
    Path(test): Path<String>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let bundle = state.trends.calculate_trends(&test, query.days).await?;
    Ok(Json(serde_json::to_value(&bundle).unwrap()))
}

/// `GET /api/tests/{t}/methods/{name}/trends`.
pub async fn method_trends(
    State(state): State<AppState>,
    Path((test, name)): Path<(String, String)>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let series = state
        .trends
        .get_method_trends(&test, &name, query.days)
        .await?;
    Ok(Json(serde_json::to_value(&series).unwrap()))
}

/// `GET /api/tests/{t}/clients/{name}/trends`.
pub async fn client_trends(
    State(state): State<AppState>,
    Path((test, name)): Path<(String, String)>,
    Query(query): Query<DaysQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let series = state
        .trends
        .get_client_trends(&test, &name, query.days)
        .await?;
    Ok(Json(serde_json::to_value(&series).unwrap()))
}
