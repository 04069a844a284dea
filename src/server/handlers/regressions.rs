use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::{DetectionOptions, Severity};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SeverityQuery {
    severity: Option<String>,
}

fn parse_severity(s: &str) -> Option<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Some(Severity::Low),
        "minor" => Some(Severity::Minor),
        "medium" => Some(Severity::Medium),
        "major" => Some(Severity::Major),
        "high" => Some(Severity::High),
        "critical" => Some(Severity::Critical),
        _ => None,
    }
}

/// `GET /api/runs/{id}/regressions` — optional `severity` filter.
pub async fn get_regressions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SeverityQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut regressions = state.regressions.get_regressions(&id).await?;
    if let Some(severity) = query.severity.as_deref().and_then(parse_severity) {
        regressions.retain(|r| r.severity == severity);
    }
    Ok(Json(json!({ "count": regressions.len(), "regressions": regressions })))
}

/// `POST /api/runs/{id}/regressions` — detect; not idempotent, each call
/// re-runs detection against the current baseline. Notifies the hub once
/// per produced regression.
pub async fn detect_regressions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<DetectionOptions>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let options = body.map(|Json(o)| o).unwrap_or_default();
    let report = state.regressions.detect_regressions(&id, options).await?;

    if !report.regressions.is_empty() {
        let run = state.storage.get_run(&id).await?;
        for regression in &report.regressions {
            state.hub.notify_regression(regression, &run);
        }
    }

    Ok(Json(serde_json::to_value(&report).unwrap()))
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeBody {
    acknowledged_by: String,
    #[serde(default)]
    #[allow(dead_code)]
    notes: Option<String>,
}

/// `POST /api/regressions/{id}/acknowledge` — one-way `new -> acknowledged`
/// transition; not idempotent, acknowledging twice conflicts the second time.
pub async fn acknowledge_regression(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AcknowledgeBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let regression = state
        .regressions
        .acknowledge_regression(&id, &body.acknowledged_by)
        .await?;
    Ok(Json(serde_json::to_value(&regression).unwrap()))
}
