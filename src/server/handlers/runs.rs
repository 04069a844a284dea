use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::{BenchmarkResult, RunFilter};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    test: Option<String>,
    branch: Option<String>,
    client: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl From<ListRunsQuery> for RunFilter {
    fn from(q: ListRunsQuery) -> Self {
        RunFilter {
            test_name: q.test,
            branch: q.branch,
            client: q.client,
            from: q.from,
            to: q.to,
            limit: q.limit.unwrap_or(50),
            offset: q.offset.unwrap_or(0),
        }
        .clamp()
    }
}

/// `GET /api/runs` — filterable, paginated run listing.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter: RunFilter = query.into();
    let runs = state.storage.list_runs(filter).await?;
    Ok(Json(json!({ "count": runs.len(), "runs": runs })))
}

/// `POST /api/runs` — the benchmark runner's ingest path: persists the
/// result, then broadcasts a `NEW_RUN` event to connected WebSocket
/// clients. See DESIGN.md for why this route exists alongside the
/// read/CRUD ones.
pub async fn ingest_run(
    State(state): State<AppState>,
    Json(result): Json<BenchmarkResult>,
) -> Result<Json<serde_json::Value>, AppError> {
    if result.id.trim().is_empty() {
        return Err(AppError::Validation("run ID is required".into()));
    }
    let run = state.storage.save_run(result).await?;
    state.hub.notify_new_run(&run);
    Ok(Json(serde_json::to_value(&run).unwrap()))
}

#[derive(Debug, Deserialize)]
pub struct ClientFilterQuery {
    client: Option<String>,
}

/// `GET /api/runs/{id}` — `client` narrows the nested metrics to one
/// client.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ClientFilterQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut run = state.storage.get_run(&id).await?;
    if let Some(client) = &query.client {
        run.full_results.clients.retain(|name, _| name == client);
    }
    Ok(Json(serde_json::to_value(&run).unwrap()))
}

/// `GET /api/runs/{id}/methods` — per-method breakdown, optionally scoped
/// to one client.
pub async fn run_methods(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ClientFilterQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let run = state.storage.get_run(&id).await?;
    let methods: HashMap<String, HashMap<String, crate::models::MetricSummary>> = run
        .full_results
        .clients
        .iter()
        .filter(|(name, _)| query.client.as_ref().map_or(true, |c| c == *name))
        .map(|(name, metrics)| (name.clone(), metrics.methods.clone()))
        .collect();
    Ok(Json(json!({ "run_id": run.id, "methods": methods })))
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// `GET /api/runs/{id}/report` — `format=html|json`.
pub async fn run_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<axum::response::Response, AppError> {
    use axum::response::IntoResponse;

    let run = state.storage.get_run(&id).await?;
    let comparison = state.analyzer.compare(&run.full_results.clients);
    let recommendations = state.analyzer.recommendations(&run.full_results.clients);

    if query.format == "html" {
        let rows: String = run
            .performance_scores
            .iter()
            .map(|(client, score)| format!("<tr><td>{client}</td><td>{score:.1}</td></tr>"))
            .collect();
        let recs: String = recommendations
            .iter()
            .map(|r| format!("<li>{r}</li>"))
            .collect();
        let html = format!(
            "<html><head><title>Report: {test}</title></head><body>\
             <h1>{test} — {id}</h1>\
             <p>Winner: {winner}</p>\
             <table><tr><th>Client</th><th>Score</th></tr>{rows}</table>\
             <ul>{recs}</ul>\
             </body></html>",
            test = run.test_name,
            id = run.id,
            winner = comparison.winner.clone().unwrap_or_else(|| "n/a".to_string()),
            rows = rows,
            recs = recs,
        );
        return Ok((
            [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response());
    }

    Ok(Json(json!({
        "run": run,
        "comparison": comparison,
        "recommendations": recommendations,
    }))
    .into_response())
}

/// `DELETE /api/runs/{id}` — idempotent: first call 200, subsequent calls
/// 404.
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.storage.delete_run(&id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    #[serde(default)]
    detailed: bool,
}

/// `GET /api/runs/{id}/compare/{id2}` — order of path segments determines
/// the direction of reported deltas. `detailed=true` adds per-method
/// regression-style findings alongside the per-client deltas.
pub async fn compare_runs(
    State(state): State<AppState>,
    Path((id, other)): Path<(String, String)>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let comparison = state.storage.compare_runs(&id, &other).await?;
    if !query.detailed {
        return Ok(Json(serde_json::to_value(&comparison).unwrap()));
    }

    let a = state.storage.get_run(&id).await?;
    let b = state.storage.get_run(&other).await?;
    let per_method_findings = state
        .analyzer
        .regression_findings(&b.full_results.clients, &a.full_results.clients);

    Ok(Json(json!({
        "comparison": comparison,
        "per_method_findings": per_method_findings,
    })))
}

/// `GET /api/runs/{id}/analysis` — full analysis bundle: scores,
/// comparison, and regression findings against the active baseline.
pub async fn analyze_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let analysis = state.regressions.analyze_run(&id).await?;
    let run = state.storage.get_run(&id).await?;
    state
        .hub
        .notify_analysis_complete(&id, &run.test_name, serde_json::to_value(&analysis).unwrap());
    Ok(Json(serde_json::to_value(&analysis).unwrap()))
}
