//! Grafana façade: the SimpleJSON datasource protocol, translated into
//! queries against the storage port. Ships a single method-aware
//! implementation — see DESIGN.md for the duplicated-façade open question
//! this resolves.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::{ClientMetrics, HistoricRun, MetricSummary, RunFilter, Severity};
use crate::server::AppState;

const METRIC_TYPES: [&str; 5] = [
    "avg_latency",
    "p95_latency",
    "p99_latency",
    "error_rate",
    "throughput",
];

/// `GET /grafana/` — connection test.
pub async fn connection_test(State(state): State<AppState>) -> Response {
    match state.storage.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "success" }))).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    target: String,
}

/// `POST /grafana/search` — flat list of metric identifiers, capped at
/// 1000, lexicographically sorted.
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Vec<String>>, AppError> {
    let mut candidates: Vec<String> = Vec::new();
    for test in state.storage.list_test_names().await? {
        let runs = state
            .storage
            .list_runs(RunFilter {
                test_name: Some(test.clone()),
                limit: RunFilter::MAX_LIMIT,
                ..Default::default()
            })
            .await?;

        let mut clients: Vec<String> = runs
            .iter()
            .flat_map(|r| r.full_results.clients.keys().cloned())
            .collect();
        clients.sort();
        clients.dedup();

        for metric in METRIC_TYPES {
            candidates.push(format!("{test}.overall.{metric}"));
            for client in &clients {
                candidates.push(format!("{test}.{client}.{metric}"));
            }
        }

        let mut client_methods: Vec<(String, String)> = runs
            .iter()
            .flat_map(|r| {
                r.full_results.clients.iter().flat_map(|(client, m)| {
                    m.methods.keys().map(move |method| (client.clone(), method.clone()))
                })
            })
            .collect();
        client_methods.sort();
        client_methods.dedup();

        for (client, method) in client_methods {
            for metric in METRIC_TYPES {
                candidates.push(format!("{test}.{client}.{method}.{metric}"));
            }
        }
    }

    candidates.sort();
    candidates.dedup();

    let needle = body.target.to_lowercase().replace('*', "");
    let filtered = if needle.is_empty() {
        candidates
    } else {
        candidates
            .into_iter()
            .filter(|c| c.to_lowercase().contains(&needle))
            .collect()
    };

    Ok(Json(filtered.into_iter().take(1000).collect()))
}

#[derive(Debug, Deserialize)]
pub struct TimeRange {
    from: serde_json::Value,
    to: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct QueryTarget {
    target: String,
    #[serde(default, rename = "refId")]
    #[allow(dead_code)]
    ref_id: Option<String>,
    #[serde(default = "default_target_type", rename = "type")]
    kind: String,
}

fn default_target_type() -> String {
    "timeserie".to_string()
}

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    range: TimeRange,
    targets: Vec<QueryTarget>,
}

/// Parsed form of `<testName>.<client|"overall">[.<method>].<metricType>`,
/// optionally wrapped in `<agg>(<metric>)`.
struct ParsedMetric {
    test_name: String,
    client: Option<String>,
    method: Option<String>,
    metric_type: String,
    aggregation: Option<String>,
}

fn parse_metric(target: &str) -> Option<ParsedMetric> {
    let (aggregation, inner) = match target.find('(') {
        Some(open) if target.ends_with(')') => {
            let agg = &target[..open];
            if matches!(agg, "rate" | "delta" | "count") {
                (Some(agg.to_string()), &target[open + 1..target.len() - 1])
            } else {
                (None, target)
            }
        }
        _ => (None, target),
    };

    let parts: Vec<&str> = inner.split('.').collect();
    match parts.len() {
        3 => Some(ParsedMetric {
            test_name: parts[0].to_string(),
            client: (parts[1] != "overall").then(|| parts[1].to_string()),
            method: None,
            metric_type: parts[2].to_string(),
            aggregation,
        }),
        4 => Some(ParsedMetric {
            test_name: parts[0].to_string(),
            client: Some(parts[1].to_string()),
            method: Some(parts[2].to_string()),
            metric_type: parts[3].to_string(),
            aggregation,
        }),
        _ => None,
    }
}

fn mean_field(metrics: &ClientMetrics, f: impl Fn(&MetricSummary) -> f64) -> f64 {
    if metrics.methods.is_empty() {
        return 0.0;
    }
    metrics.methods.values().map(f).sum::<f64>() / metrics.methods.len() as f64
}

fn metric_value(
    run: &HistoricRun,
    client: Option<&str>,
    method: Option<&str>,
    metric_type: &str,
) -> Option<f64> {
    match (client, method) {
        (None, _) => match metric_type {
            "avg_latency" => Some(run.avg_latency_ms),
            "p95_latency" => Some(run.p95_latency_ms),
            "p99_latency" => Some(run.p99_latency_ms),
            "error_rate" => Some(run.overall_error_rate * 100.0),
            "throughput" => Some(run.target_rps),
            _ => None,
        },
        (Some(c), None) => {
            let cm = run.full_results.clients.get(c)?;
            match metric_type {
                "avg_latency" => Some(mean_field(cm, |m| m.avg)),
                "p95_latency" => Some(mean_field(cm, |m| m.p95)),
                "p99_latency" => Some(mean_field(cm, |m| m.p99)),
                "error_rate" => Some(cm.error_rate),
                "throughput" => Some(mean_field(cm, |m| m.throughput)),
                _ => None,
            }
        }
        (Some(c), Some(m)) => {
            let summary = run.full_results.clients.get(c)?.methods.get(m)?;
            match metric_type {
                "avg_latency" => Some(summary.avg),
                "p95_latency" => Some(summary.p95),
                "p99_latency" => Some(summary.p99),
                "error_rate" => Some(summary.error_rate),
                "throughput" => Some(summary.throughput),
                _ => None,
            }
        }
    }
}

/// `rate` = `(v_i - v_{i-1})/dt_seconds`, `delta` = `v_i - v_{i-1}`, `count`
/// is a cumulative count starting at 1; the first point of `rate`/`delta`
/// emits `0` for lack of a predecessor.
fn apply_aggregation(series: Vec<(i64, f64)>, aggregation: Option<&str>) -> Vec<(i64, f64)> {
    match aggregation {
        None => series,
        Some("count") => series
            .into_iter()
            .enumerate()
            .map(|(i, (ts, _))| (ts, (i + 1) as f64))
            .collect(),
        Some("rate") => series
            .iter()
            .enumerate()
            .map(|(i, (ts, v))| {
                if i == 0 {
                    (*ts, 0.0)
                } else {
                    let (prev_ts, prev_v) = series[i - 1];
                    let dt = ((*ts - prev_ts) as f64 / 1000.0).max(f64::EPSILON);
                    (*ts, (v - prev_v) / dt)
                }
            })
            .collect(),
        Some("delta") => series
            .iter()
            .enumerate()
            .map(|(i, (ts, v))| {
                if i == 0 {
                    (*ts, 0.0)
                } else {
                    (*ts, v - series[i - 1].1)
                }
            })
            .collect(),
        Some(_) => series,
    }
}

fn parse_time_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_flexible_time(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        _ => None,
    }
}

/// Accepts RFC3339, RFC3339Nano, and a pragmatic set of variants, plus unix
/// seconds/milliseconds detected by magnitude.
fn parse_flexible_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.and_hms_opt(0, 0, 0).unwrap().and_utc());
        }
    }
    raw.parse::<i64>().ok().and_then(epoch_to_datetime)
}

fn epoch_to_datetime(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() > 10_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// `POST /grafana/query`. Unknown metric types are skipped without
/// failing the whole batch.
pub async fn query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let since = parse_time_value(&body.range.from)
        .ok_or_else(|| AppError::Validation("invalid range.from".into()))?;
    let until = parse_time_value(&body.range.to)
        .ok_or_else(|| AppError::Validation("invalid range.to".into()))?;

    let mut results = Vec::new();
    for target in &body.targets {
        let Some(parsed) = parse_metric(&target.target) else {
            continue;
        };

        let runs = state
            .storage
            .list_runs(RunFilter {
                test_name: Some(parsed.test_name.clone()),
                from: Some(since),
                to: Some(until),
                limit: RunFilter::MAX_LIMIT,
                ..Default::default()
            })
            .await?;

        let mut series: Vec<(i64, f64)> = runs
            .iter()
            .filter_map(|r| {
                metric_value(r, parsed.client.as_deref(), parsed.method.as_deref(), &parsed.metric_type)
                    .map(|v| (r.timestamp.timestamp_millis(), v))
            })
            .collect();
        series.sort_by_key(|(ts, _)| *ts);
        let series = apply_aggregation(series, parsed.aggregation.as_deref());

        if target.kind == "table" {
            results.push(json!({
                "columns": [{"text": "Time", "type": "time"}, {"text": "Value", "type": "number"}],
                "rows": series.iter().map(|(ts, v)| json!([ts, v])).collect::<Vec<_>>(),
                "type": "table",
                "meta": { "target": target.target },
            }));
        } else {
            results.push(json!({
                "target": target.target,
                "datapoints": series.iter().map(|(ts, v)| json!([v, ts])).collect::<Vec<_>>(),
                "meta": { "target": target.target },
            }));
        }
    }

    Ok(Json(serde_json::Value::Array(results)))
}

#[derive(Debug, Deserialize)]
pub struct AnnotationsBody {
    range: TimeRange,
    #[serde(default)]
    test_name: Option<String>,
}

fn icon_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "red",
        Severity::Major => "orange",
        Severity::Minor => "yellow",
        _ => "blue",
    }
}

/// `POST /grafana/annotations` — regression (severity-colored), baseline
/// (green), and deployment (blue) annotations, capped at 100/50/50
/// respectively and filtered to the requested window.
pub async fn annotations(
    State(state): State<AppState>,
    Json(body): Json<AnnotationsBody>,
) -> Result<Json<Vec<serde_json::Value>>, AppError> {
    let since = parse_time_value(&body.range.from)
        .ok_or_else(|| AppError::Validation("invalid range.from".into()))?;
    let until = parse_time_value(&body.range.to)
        .ok_or_else(|| AppError::Validation("invalid range.to".into()))?;

    let runs = state
        .storage
        .list_runs(RunFilter {
            test_name: body.test_name.clone(),
            from: Some(since),
            to: Some(until),
            limit: RunFilter::MAX_LIMIT,
            ..Default::default()
        })
        .await?;

    let mut out = Vec::new();

    for run in runs.iter().take(50) {
        out.push(json!({
            "time": run.timestamp.timestamp_millis(),
            "title": format!("run {}", run.id),
            "text": format!("{} on {}", run.test_name, run.git_branch),
            "tags": ["deployment", run.test_name],
            "iconColor": "blue",
        }));
    }

    let mut regression_count = 0usize;
    'runs: for run in &runs {
        for r in state.storage.list_regressions(&run.id).await? {
            if r.detected_at < since || r.detected_at > until {
                continue;
            }
            if regression_count >= 100 {
                break 'runs;
            }
            out.push(json!({
                "time": r.detected_at.timestamp_millis(),
                "title": format!("regression: {} {}", r.client, r.metric),
                "text": format!("{:+.1}% change vs baseline {}", r.percent_change, r.baseline_run_id),
                "tags": ["regression", r.severity],
                "iconColor": icon_color(r.severity),
            }));
            regression_count += 1;
        }
    }

    let baselines = state
        .baselines
        .list_baselines(body.test_name.as_deref())
        .await?;
    for baseline in baselines
        .into_iter()
        .filter(|b| b.created_at >= since && b.created_at <= until)
        .take(50)
    {
        out.push(json!({
            "time": baseline.created_at.timestamp_millis(),
            "title": format!("baseline created: {}", baseline.name),
            "text": format!("from run {}", baseline.run_id),
            "tags": ["baseline", baseline.test_name],
            "iconColor": "green",
        }));
    }

    out.sort_by_key(|a| a["time"].as_i64().unwrap_or(0));
    Ok(Json(out))
}

/// `POST /grafana/tag-keys` — static taxonomy.
pub async fn tag_keys() -> Json<serde_json::Value> {
    Json(json!([
        { "type": "string", "text": "test_name" },
        { "type": "string", "text": "client" },
        { "type": "string", "text": "metric_type" },
    ]))
}

#[derive(Debug, Deserialize)]
pub struct TagValuesBody {
    key: String,
}

/// `POST /grafana/tag-values`.
pub async fn tag_values(
    State(state): State<AppState>,
    Json(body): Json<TagValuesBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let values: Vec<String> = match body.key.as_str() {
        "test_name" => state.storage.list_test_names().await?,
        "client" => {
            let mut clients = HashSet::new();
            for test in state.storage.list_test_names().await? {
                let runs = state
                    .storage
                    .list_runs(RunFilter {
                        test_name: Some(test),
                        limit: RunFilter::MAX_LIMIT,
                        ..Default::default()
                    })
                    .await?;
                for run in runs {
                    clients.extend(run.full_results.clients.into_keys());
                }
            }
            let mut clients: Vec<String> = clients.into_iter().collect();
            clients.sort();
            clients
        }
        "metric_type" => METRIC_TYPES.iter().map(|s| s.to_string()).collect(),
        _ => Vec::new(),
    };

    Ok(Json(json!(values
        .into_iter()
        .map(|v| json!({ "text": v }))
        .collect::<Vec<_>>())))
}
