//! Reference `Storage` implementation backed by an in-process map
//! (`Arc<RwLock<HashMap<..>>>`) covering the run/baseline/regression
//! entities this port owns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    Baseline, BenchmarkResult, ClientDelta, FullResults, HistoricComparison, HistoricRun,
    HistoricSummary, Regression, RunFilter, TrendBucket, TrendFilter, TrendPoint, TrendSeries,
};

use super::{Storage, StorageResult};

#[derive(Default)]
struct Inner {
    runs: HashMap<String, HistoricRun>,
    blobs: HashMap<String, Vec<u8>>,
    baselines: HashMap<String, Baseline>,
    regressions: HashMap<String, Regression>,
}

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn overall_metric(run: &HistoricRun, metric: &str) -> Option<f64> {
    match metric {
        "avg_latency" => Some(run.avg_latency_ms),
        "p95_latency" => Some(run.p95_latency_ms),
        "p99_latency" => Some(run.p99_latency_ms),
        "error_rate" => Some(run.overall_error_rate * 100.0),
        "throughput" => Some(run.target_rps),
        _ => None,
    }
}

fn client_metric(metrics: &crate::models::ClientMetrics, metric: &str) -> Option<f64> {
    match metric {
        "avg_latency" => Some(mean_percentile(metrics, |m| m.avg)),
        "p95_latency" => Some(mean_percentile(metrics, |m| m.p95)),
        "p99_latency" => Some(mean_percentile(metrics, |m| m.p99)),
        "error_rate" => Some(metrics.error_rate),
        "throughput" => Some(mean_throughput(metrics)),
        _ => None,
    }
}

fn method_summary_metric(summary: &crate::models::MetricSummary, metric: &str) -> Option<f64> {
    match metric {
        "avg_latency" => Some(summary.avg),
        "p95_latency" => Some(summary.p95),
        "p99_latency" => Some(summary.p99),
        "error_rate" => Some(summary.error_rate),
        "throughput" => Some(summary.throughput),
        _ => None,
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_run(&self, result: BenchmarkResult) -> StorageResult<HistoricRun> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.runs.get_mut(&result.id) {
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let run = build_run(result)?;
        run.validate().map_err(StorageError::Conflict)?;
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: &str) -> StorageResult<HistoricRun> {
        self.inner
            .read()
            .await
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("run {id} not found")))
    }

    async fn list_runs(&self, filter: RunFilter) -> StorageResult<Vec<HistoricRun>> {
        let filter = filter.clamp();
        let inner = self.inner.read().await;
        let mut runs: Vec<HistoricRun> = inner
            .runs
            .values()
            .filter(|r| {
                filter
                    .test_name
                    .as_ref()
                    .map_or(true, |t| &r.test_name == t)
                    && filter.branch.as_ref().map_or(true, |b| &r.git_branch == b)
                    && filter
                        .client
                        .as_ref()
                        .map_or(true, |c| r.full_results.clients.contains_key(c))
                    && filter.from.map_or(true, |f| r.timestamp >= f)
                    && filter.to.map_or(true, |t| r.timestamp <= t)
            })
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

        let start = filter.offset as usize;
        let end = start.saturating_add(filter.limit as usize);
        Ok(runs.into_iter().skip(start).take(end - start).collect())
    }

    async fn delete_run(&self, id: &str) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.runs.remove(id).is_none() {
            return Err(StorageError::NotFound(format!("run {id} not found")));
        }
        inner.regressions.retain(|_, r| r.run_id != id);
        inner.blobs.remove(id);
        Ok(())
    }

    async fn compare_runs(&self, id1: &str, id2: &str) -> StorageResult<HistoricComparison> {
        let inner = self.inner.read().await;
        let a = inner
            .runs
            .get(id1)
            .ok_or_else(|| StorageError::NotFound(format!("run {id1} not found")))?;
        let b = inner
            .runs
            .get(id2)
            .ok_or_else(|| StorageError::NotFound(format!("run {id2} not found")))?;

        let mut per_client = HashMap::new();
        for (client, a_metrics) in &a.full_results.clients {
            let Some(b_metrics) = b.full_results.clients.get(client) else {
                continue;
            };
            let a_avg = mean_throughput(a_metrics);
            let b_avg = mean_throughput(b_metrics);
            let a_p95 = mean_percentile(a_metrics, |m| m.p95);
            let b_p95 = mean_percentile(b_metrics, |m| m.p95);
            let a_p99 = mean_percentile(a_metrics, |m| m.p99);
            let b_p99 = mean_percentile(b_metrics, |m| m.p99);
            per_client.insert(
                client.clone(),
                ClientDelta {
                    error_rate_change: b_metrics.error_rate - a_metrics.error_rate,
                    avg_latency_change: 0.0,
                    p95_latency_change: b_p95 - a_p95,
                    p99_latency_change: b_p99 - a_p99,
                    throughput_change: b_avg - a_avg,
                },
            );
        }

        let summary = format!(
            "run {} vs {}: overall error rate {:+.2}pp, p95 latency {:+.2}ms",
            id2,
            id1,
            (b.overall_error_rate - a.overall_error_rate) * 100.0,
            b.p95_latency_ms - a.p95_latency_ms
        );

        Ok(HistoricComparison {
            run_id: id2.to_string(),
            baseline_run_id: id1.to_string(),
            per_client,
            summary,
        })
    }

    async fn get_trends(&self, filter: TrendFilter) -> StorageResult<TrendSeries> {
        let inner = self.inner.read().await;
        let bucket = filter
            .bucket
            .unwrap_or_else(|| TrendBucket::for_span(filter.since, filter.until));
        let metric = filter.metric.clone().unwrap_or_else(|| "p95_latency".into());

        let mut buckets: HashMap<chrono::DateTime<Utc>, (f64, u64)> = HashMap::new();
        for run in inner.runs.values() {
            if run.test_name != filter.test_name {
                continue;
            }
            if run.timestamp < filter.since || run.timestamp > filter.until {
                continue;
            }
            let value = match (&filter.client, &filter.method) {
                (Some(client), Some(method)) => {
                    let Some(metrics) = run.full_results.clients.get(client) else {
                        continue;
                    };
                    let Some(summary) = metrics.methods.get(method) else {
                        continue;
                    };
                    let Some(value) = method_summary_metric(summary, &metric) else {
                        continue;
                    };
                    value
                }
                (Some(client), None) => {
                    let Some(metrics) = run.full_results.clients.get(client) else {
                        continue;
                    };
                    let Some(value) = client_metric(metrics, &metric) else {
                        continue;
                    };
                    value
                }
                (None, Some(method)) => {
                    let values: Vec<f64> = run
                        .full_results
                        .clients
                        .values()
                        .filter_map(|c| c.methods.get(method))
                        .filter_map(|summary| method_summary_metric(summary, &metric))
                        .collect();
                    if values.is_empty() {
                        continue;
                    }
                    values.iter().sum::<f64>() / values.len() as f64
                }
                (None, None) => {
                    let Some(value) = overall_metric(run, &metric) else {
                        continue;
                    };
                    value
                }
            };
            let key = bucket.floor(run.timestamp);
            let entry = buckets.entry(key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        let mut points: Vec<TrendPoint> = buckets
            .into_iter()
            .map(|(ts, (sum, count))| TrendPoint {
                timestamp: ts,
                value: sum / count as f64,
                client: filter.client.clone(),
                method: filter.method.clone(),
                metric: Some(metric.clone()),
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);

        Ok(TrendSeries {
            test_name: filter.test_name,
            metric,
            points,
        })
    }

    async fn get_summary(&self, filter: RunFilter) -> StorageResult<HistoricSummary> {
        let runs = self.list_runs(RunFilter {
            limit: RunFilter::MAX_LIMIT,
            ..filter.clone()
        }).await?;

        if runs.is_empty() {
            return Ok(HistoricSummary {
                test_name: filter.test_name.unwrap_or_default(),
                total_runs: 0,
                date_range: None,
                best_run_id: None,
                worst_run_id: None,
                avg_error_rate: 0.0,
                avg_p95_latency_ms: 0.0,
            });
        }

        let best = runs
            .iter()
            .min_by(|a, b| a.p95_latency_ms.total_cmp(&b.p95_latency_ms))
            .map(|r| r.id.clone());
        let worst = runs
            .iter()
            .max_by(|a, b| a.p95_latency_ms.total_cmp(&b.p95_latency_ms))
            .map(|r| r.id.clone());
        let min_ts = runs.iter().map(|r| r.timestamp).min().unwrap();
        let max_ts = runs.iter().map(|r| r.timestamp).max().unwrap();
        let avg_error_rate =
            runs.iter().map(|r| r.overall_error_rate).sum::<f64>() / runs.len() as f64;
        let avg_p95 = runs.iter().map(|r| r.p95_latency_ms).sum::<f64>() / runs.len() as f64;

        Ok(HistoricSummary {
            test_name: runs[0].test_name.clone(),
            total_runs: runs.len() as u64,
            date_range: Some((min_ts, max_ts)),
            best_run_id: best,
            worst_run_id: worst,
            avg_error_rate,
            avg_p95_latency_ms: avg_p95,
        })
    }

    async fn list_test_names(&self) -> StorageResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .runs
            .values()
            .map(|r| r.test_name.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn save_result_files(&self, run_id: &str, blob: Vec<u8>) -> StorageResult<()> {
        self.inner.write().await.blobs.insert(run_id.to_string(), blob);
        Ok(())
    }

    async fn get_result_files(&self, run_id: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.read().await.blobs.get(run_id).cloned())
    }

    async fn cleanup_old_files(&self, retention: chrono::Duration) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - retention;
        let stale: Vec<String> = inner
            .blobs
            .keys()
            .filter(|id| {
                inner
                    .runs
                    .get(*id)
                    .map(|r| r.created_at < cutoff)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let removed = stale.len() as u64;
        for id in stale {
            inner.blobs.remove(&id);
        }
        Ok(removed)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn save_baseline(&self, baseline: Baseline) -> StorageResult<Baseline> {
        let mut inner = self.inner.write().await;
        inner
            .baselines
            .insert(baseline.name.clone(), baseline.clone());
        Ok(baseline)
    }

    async fn get_baseline(&self, name: &str) -> StorageResult<Baseline> {
        self.inner
            .read()
            .await
            .baselines
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("baseline {name} not found")))
    }

    async fn list_baselines(&self, test_name: Option<&str>) -> StorageResult<Vec<Baseline>> {
        let inner = self.inner.read().await;
        let mut baselines: Vec<Baseline> = inner
            .baselines
            .values()
            .filter(|b| test_name.map_or(true, |t| b.test_name == t))
            .cloned()
            .collect();
        baselines.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(baselines)
    }

    async fn delete_baseline(&self, name: &str) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .baselines
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("baseline {name} not found")))
    }

    async fn save_regressions(
        &self,
        run_id: &str,
        mut regressions: Vec<Regression>,
    ) -> StorageResult<Vec<Regression>> {
        let mut inner = self.inner.write().await;
        inner.regressions.retain(|_, r| r.run_id != run_id);
        for r in &mut regressions {
            if r.id.is_empty() {
                r.id = Uuid::new_v4().to_string();
            }
            inner.regressions.insert(r.id.clone(), r.clone());
        }
        Ok(regressions)
    }

    async fn list_regressions(&self, run_id: &str) -> StorageResult<Vec<Regression>> {
        let inner = self.inner.read().await;
        let mut regressions: Vec<Regression> = inner
            .regressions
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        regressions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(regressions)
    }

    async fn get_regression(&self, id: &str) -> StorageResult<Regression> {
        self.inner
            .read()
            .await
            .regressions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("regression {id} not found")))
    }

    async fn acknowledge_regression(
        &self,
        id: &str,
        acknowledged_by: &str,
    ) -> StorageResult<Regression> {
        let mut inner = self.inner.write().await;
        let regression = inner
            .regressions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("regression {id} not found")))?;
        regression.acknowledged_by = Some(acknowledged_by.to_string());
        regression.acknowledged_at = Some(Utc::now());
        Ok(regression.clone())
    }
}

fn mean_throughput(metrics: &crate::models::ClientMetrics) -> f64 {
    if metrics.methods.is_empty() {
        return 0.0;
    }
    metrics.methods.values().map(|m| m.throughput).sum::<f64>() / metrics.methods.len() as f64
}

fn mean_percentile(
    metrics: &crate::models::ClientMetrics,
    f: impl Fn(&crate::models::MetricSummary) -> f64,
) -> f64 {
    if metrics.methods.is_empty() {
        return 0.0;
    }
    metrics.methods.values().map(f).sum::<f64>() / metrics.methods.len() as f64
}

fn build_run(result: BenchmarkResult) -> StorageResult<HistoricRun> {
    let FullResults { clients } = result.full_results.clone();

    let total_requests: u64 = clients.values().map(|c| c.total_requests).sum();
    let total_errors: u64 = clients.values().map(|c| c.total_errors).sum();
    let overall_error_rate = if total_requests > 0 {
        total_errors as f64 / total_requests as f64
    } else {
        0.0
    };

    let avg_latency_ms = mean_over_clients(&clients, |m| m.avg);
    let p95_latency_ms = mean_over_clients(&clients, |m| m.p95);
    let p99_latency_ms = mean_over_clients(&clients, |m| m.p99).max(p95_latency_ms);
    let max_latency_ms = clients
        .values()
        .flat_map(|c| c.methods.values())
        .map(|m| m.max)
        .fold(0.0_f64, f64::max)
        .max(p99_latency_ms);

    let performance_scores = crate::analysis::scoring::score_clients(&clients);
    let best_client = performance_scores
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(name, _)| name.clone())
        .unwrap_or_default();

    let now = Utc::now();
    Ok(HistoricRun {
        id: result.id,
        test_name: result.test_name,
        description: result.description,
        git_commit: result.git_commit,
        git_branch: result.git_branch,
        timestamp: now,
        start_time: result.start_time,
        end_time: result.end_time,
        duration_ms: (result.end_time - result.start_time).num_milliseconds() as f64,
        client_count: clients.len() as u32,
        endpoint_count: clients
            .values()
            .map(|c| c.methods.len())
            .max()
            .unwrap_or(0) as u32,
        target_rps: result.target_rps,
        total_requests,
        total_errors,
        overall_error_rate,
        avg_latency_ms,
        p95_latency_ms,
        p99_latency_ms,
        max_latency_ms,
        best_client,
        performance_scores,
        full_results: FullResults { clients },
        notes: String::new(),
        created_at: now,
        updated_at: now,
    })
}

fn mean_over_clients(
    clients: &HashMap<String, crate::models::ClientMetrics>,
    f: impl Fn(&crate::models::MetricSummary) -> f64 + Copy,
) -> f64 {
    let values: Vec<f64> = clients
        .values()
        .map(|c| mean_percentile(c, f))
        .filter(|v| *v > 0.0)
        .collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
