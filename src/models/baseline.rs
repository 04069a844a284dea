use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricSummary;

/// A named, snapshotted reference point copied from a run at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub name: String,
    pub run_id: String,
    pub test_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub git_branch: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub metrics: BaselineMetrics,
}

/// Denormalized snapshot used for fast comparison without rehydrating the
/// source run. Taken once, at baseline creation; never re-snapshotted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub overall_error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub per_client: HashMap<String, ClientBaselineMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientBaselineMetrics {
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub per_method: HashMap<String, MetricSummary>,
}

/// Result of `BaselineManager::compare_to_baseline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub run_id: String,
    pub baseline_name: String,
    pub overall_percent_change: f64,
    pub verdict: String,
    pub per_client: HashMap<String, ClientComparisonStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientComparisonStatus {
    pub error_rate_change: f64,
    pub latency_change: f64,
    pub p95_latency_change: f64,
    pub status: ComparisonStatus,
    pub per_method: HashMap<String, MethodComparisonStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodComparisonStatus {
    pub throughput_change: f64,
    pub latency_change: f64,
    pub status: ComparisonStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Improved,
    Regressed,
    Unchanged,
}
