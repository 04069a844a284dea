//! Baseline manager: create/read/update/delete named baselines and compare
//! a run against one. Persistence flows entirely through the storage port.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::AppError;
use crate::models::{
    Baseline, BaselineComparison, BaselineMetrics, ClientBaselineMetrics,
    ClientComparisonStatus, ComparisonStatus, HistoricRun, MethodComparisonStatus,
};
use crate::storage::Storage;

pub struct BaselineManager {
    storage: Arc<dyn Storage>,
}

impl BaselineManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Snapshots `run`'s aggregates into a new baseline. `test_name` is
    /// derived from the source run and immutable thereafter.
    pub async fn set_baseline(
        &self,
        run: &HistoricRun,
        name: &str,
        description: &str,
    ) -> Result<Baseline, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("baseline name is required".into()));
        }

        let per_client = run
            .full_results
            .clients
            .iter()
            .map(|(client, metrics)| {
                (
                    client.clone(),
                    ClientBaselineMetrics {
                        error_rate: metrics.error_rate,
                        avg_latency_ms: mean(&metrics.methods, |m| m.avg),
                        p95_latency_ms: mean(&metrics.methods, |m| m.p95),
                        p99_latency_ms: mean(&metrics.methods, |m| m.p99),
                        per_method: metrics.methods.clone(),
                    },
                )
            })
            .collect();

        let now = Utc::now();
        let baseline = Baseline {
            name: name.to_string(),
            run_id: run.id.clone(),
            test_name: run.test_name.clone(),
            description: description.to_string(),
            git_commit: run.git_commit.clone(),
            git_branch: run.git_branch.clone(),
            created_at: now,
            updated_at: now,
            is_active: true,
            metrics: BaselineMetrics {
                overall_error_rate: run.overall_error_rate,
                avg_latency_ms: run.avg_latency_ms,
                p95_latency_ms: run.p95_latency_ms,
                p99_latency_ms: run.p99_latency_ms,
                per_client,
            },
        };

        Ok(self.storage.save_baseline(baseline).await?)
    }

    pub async fn get_baseline(&self, name: &str) -> Result<Baseline, AppError> {
        Ok(self.storage.get_baseline(name).await?)
    }

    pub async fn list_baselines(
        &self,
        test_name: Option<&str>,
    ) -> Result<Vec<Baseline>, AppError> {
        Ok(self.storage.list_baselines(test_name).await?)
    }

    /// Renames/redescribes a baseline without re-snapshotting its metrics.
    pub async fn update_baseline(
        &self,
        name: &str,
        new_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Baseline, AppError> {
        let mut baseline = self.storage.get_baseline(name).await?;
        if let Some(desc) = description {
            baseline.description = desc.to_string();
        }
        baseline.updated_at = Utc::now();

        if let Some(new_name) = new_name {
            if new_name != name {
                self.storage.delete_baseline(name).await?;
                baseline.name = new_name.to_string();
            }
        }
        Ok(self.storage.save_baseline(baseline).await?)
    }

    pub async fn deactivate_baseline(&self, name: &str) -> Result<Baseline, AppError> {
        let mut baseline = self.storage.get_baseline(name).await?;
        baseline.is_active = false;
        baseline.updated_at = Utc::now();
        Ok(self.storage.save_baseline(baseline).await?)
    }

    pub async fn delete_baseline(&self, name: &str) -> Result<(), AppError> {
        Ok(self.storage.delete_baseline(name).await?)
    }

    pub async fn compare_to_baseline(
        &self,
        run: &HistoricRun,
        name: &str,
    ) -> Result<BaselineComparison, AppError> {
        let baseline = self.storage.get_baseline(name).await?;
        let m = &baseline.metrics;

        let overall_percent_change = percent_change(m.p95_latency_ms, run.p95_latency_ms);
        let verdict = if overall_percent_change > 10.0 {
            format!("regressed by {overall_percent_change:.1}% vs baseline '{name}'")
        } else if overall_percent_change < -10.0 {
            format!("improved by {:.1}% vs baseline '{name}'", -overall_percent_change)
        } else {
            format!("unchanged vs baseline '{name}'")
        };

        let mut per_client = HashMap::new();
        for (client, cur) in &run.full_results.clients {
            let Some(base) = m.per_client.get(client) else {
                continue;
            };
            let cur_p95 = mean(&cur.methods, |ms| ms.p95);
            let cur_avg = mean(&cur.methods, |ms| ms.avg);
            let error_rate_change = cur.error_rate - base.error_rate;
            let latency_change = cur_avg - base.avg_latency_ms;
            let p95_latency_change = cur_p95 - base.p95_latency_ms;

            let status = classify(error_rate_change, p95_latency_change, base.p95_latency_ms);

            let per_method = cur
                .methods
                .iter()
                .filter_map(|(method, cur_summary)| {
                    let base_summary = base.per_method.get(method)?;
                    let throughput_change =
                        percent_change(base_summary.throughput, cur_summary.throughput);
                    let latency_change = percent_change(base_summary.p95, cur_summary.p95);
                    let status = if latency_change > 10.0 || throughput_change < -15.0 {
                        ComparisonStatus::Regressed
                    } else if latency_change < -10.0 || throughput_change > 15.0 {
                        ComparisonStatus::Improved
                    } else {
                        ComparisonStatus::Unchanged
                    };
                    Some((
                        method.clone(),
                        MethodComparisonStatus {
                            throughput_change,
                            latency_change,
                            status,
                        },
                    ))
                })
                .collect();

            per_client.insert(
                client.clone(),
                ClientComparisonStatus {
                    error_rate_change,
                    latency_change,
                    p95_latency_change,
                    status,
                    per_method,
                },
            );
        }

        Ok(BaselineComparison {
            run_id: run.id.clone(),
            baseline_name: name.to_string(),
            overall_percent_change,
            verdict,
            per_client,
        })
    }
}

fn classify(error_rate_change: f64, p95_latency_change: f64, base_p95: f64) -> ComparisonStatus {
    let p95_pct = percent_change(base_p95, base_p95 + p95_latency_change);
    if error_rate_change > 1.0 || p95_pct > 10.0 {
        ComparisonStatus::Regressed
    } else if error_rate_change < -1.0 || p95_pct < -10.0 {
        ComparisonStatus::Improved
    } else {
        ComparisonStatus::Unchanged
    }
}

fn percent_change(base: f64, current: f64) -> f64 {
    if base == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        100.0 * (current - base) / base
    }
}

fn mean(
    methods: &HashMap<String, crate::models::MetricSummary>,
    f: impl Fn(&crate::models::MetricSummary) -> f64,
) -> f64 {
    if methods.is_empty() {
        return 0.0;
    }
    methods.values().map(f).sum::<f64>() / methods.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientMetrics, FullResults, MetricSummary};
    use crate::storage::memory::InMemoryStorage;

    fn sample_run(id: &str, p95: f64) -> HistoricRun {
        let mut methods = HashMap::new();
        methods.insert(
            "get".to_string(),
            MetricSummary {
                p95,
                avg: p95 * 0.7,
                throughput: 500.0,
                ..Default::default()
            },
        );
        let mut clients = HashMap::new();
        clients.insert(
            "reqwest".to_string(),
            ClientMetrics {
                error_rate: 0.5,
                methods,
                ..Default::default()
            },
        );
        let now = Utc::now();
        HistoricRun {
            id: id.to_string(),
            test_name: "bench".to_string(),
            description: String::new(),
            git_commit: String::new(),
            git_branch: "main".to_string(),
            timestamp: now,
            start_time: now,
            end_time: now,
            duration_ms: 1000.0,
            client_count: 1,
            endpoint_count: 1,
            target_rps: 100.0,
            total_requests: 1000,
            total_errors: 5,
            overall_error_rate: 0.005,
            avg_latency_ms: p95 * 0.7,
            p95_latency_ms: p95,
            p99_latency_ms: p95 * 1.1,
            max_latency_ms: p95 * 1.5,
            best_client: "reqwest".to_string(),
            performance_scores: HashMap::from([("reqwest".to_string(), 80.0)]),
            full_results: FullResults { clients },
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_name_description_and_run_id() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let manager = BaselineManager::new(storage);
        let run = sample_run("r1", 100.0);

        let created = manager
            .set_baseline(&run, "nightly", "nightly baseline")
            .await
            .unwrap();
        let fetched = manager.get_baseline("nightly").await.unwrap();

        assert_eq!(fetched.run_id, run.id);
        assert_eq!(fetched.name, "nightly");
        assert_eq!(fetched.description, "nightly baseline");
        assert_eq!(created.metrics.p95_latency_ms, fetched.metrics.p95_latency_ms);
    }

    #[tokio::test]
    async fn rename_never_resnapshots_metrics() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let manager = BaselineManager::new(storage);
        let run = sample_run("r1", 100.0);
        manager.set_baseline(&run, "v1", "").await.unwrap();

        let other_run = sample_run("r2", 999.0);
        manager
            .update_baseline("v1", Some("v1-renamed"), Some("renamed"))
            .await
            .unwrap();

        let fetched = manager.get_baseline("v1-renamed").await.unwrap();
        assert_eq!(fetched.metrics.p95_latency_ms, 100.0);
        assert_ne!(fetched.metrics.p95_latency_ms, other_run.p95_latency_ms);
    }
}
