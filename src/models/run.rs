use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical record of a completed benchmark, as persisted by the storage port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricRun {
    pub id: String,
    pub test_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub git_branch: String,
    pub timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub client_count: u32,
    pub endpoint_count: u32,
    pub target_rps: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub overall_error_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub max_latency_ms: f64,
    #[serde(default)]
    pub best_client: String,
    pub performance_scores: HashMap<String, f64>,
    pub full_results: FullResults,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoricRun {
    /// Checks the invariants a persisted run must satisfy. Storage
    /// implementations call this before accepting a write.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.overall_error_rate) {
            return Err("overall_error_rate must be within [0,1]".into());
        }
        if self.p95_latency_ms > self.p99_latency_ms || self.p99_latency_ms > self.max_latency_ms
        {
            return Err("latency percentiles must satisfy p95 <= p99 <= max".into());
        }
        if self.total_errors > self.total_requests {
            return Err("total_errors cannot exceed total_requests".into());
        }
        if !self.performance_scores.is_empty()
            && !self.performance_scores.contains_key(&self.best_client)
        {
            return Err("best_client must be a key of performance_scores".into());
        }
        Ok(())
    }
}

/// Raw ingest payload for a benchmark completion, as submitted by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub id: String,
    pub test_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub git_branch: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target_rps: f64,
    pub full_results: FullResults,
}

/// Client- and method-scoped breakdown for a run, opaque to the storage port
/// but consumed by the analysis pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullResults {
    pub clients: HashMap<String, ClientMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetrics {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub success_rate: f64,
    pub methods: HashMap<String, MetricSummary>,
    #[serde(default)]
    pub connections_opened: u64,
    #[serde(default)]
    pub connections_closed: u64,
    #[serde(default)]
    pub error_types: HashMap<String, u64>,
}

impl ClientMetrics {
    /// Recomputes the rate fields from the request/error counts so that
    /// `success_rate + error_rate == 100` holds.
    pub fn recompute_rates(&mut self) {
        if self.total_requests > 0 {
            self.error_rate = 100.0 * self.total_errors as f64 / self.total_requests as f64;
            self.success_rate = 100.0 - self.error_rate;
        } else {
            self.error_rate = 0.0;
            self.success_rate = 0.0;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub coeff_var: f64,
    pub throughput: f64,
    pub success_rate: f64,
    pub error_rate: f64,
}

impl MetricSummary {
    /// The source's crude range-based estimator (`(max-min)/4`), kept as the
    /// default for backward compatibility of historical numbers. See
    /// DESIGN.md for the real-variance alternative kept behind an option.
    pub fn range_std_dev(&self) -> f64 {
        (self.max - self.min) / 4.0
    }

    pub fn coefficient_of_variation(&self) -> f64 {
        if self.avg == 0.0 {
            0.0
        } else {
            100.0 * self.std_dev / self.avg
        }
    }
}

/// Result of `Storage::compare_runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricComparison {
    pub run_id: String,
    pub baseline_run_id: String,
    pub per_client: HashMap<String, ClientDelta>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDelta {
    pub error_rate_change: f64,
    pub avg_latency_change: f64,
    pub p95_latency_change: f64,
    pub p99_latency_change: f64,
    pub throughput_change: f64,
}

/// Aggregate counts and rolling bests/worsts for `Storage::get_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricSummary {
    pub test_name: String,
    pub total_runs: u64,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub best_run_id: Option<String>,
    pub worst_run_id: Option<String>,
    pub avg_error_rate: f64,
    pub avg_p95_latency_ms: f64,
}

/// Filter for `Storage::list_runs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunFilter {
    pub test_name: Option<String>,
    pub branch: Option<String>,
    pub client: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

impl RunFilter {
    pub const MAX_LIMIT: u32 = 1000;

    /// Clamps `limit` to the documented [1, MAX_LIMIT] range.
    pub fn clamp(mut self) -> Self {
        if self.limit == 0 {
            self.limit = default_limit();
        }
        self.limit = self.limit.min(Self::MAX_LIMIT);
        self
    }
}
