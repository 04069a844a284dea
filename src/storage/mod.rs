//! The storage port: a capability set, not a class. Only the contract is
//! normative — the persistence layer behind it is an external collaborator.
//! [`memory::InMemoryStorage`] is the one conforming implementation shipped
//! with this crate.

pub mod memory;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{
    Baseline, BenchmarkResult, HistoricComparison, HistoricRun, HistoricSummary, Regression,
    RunFilter, TrendFilter, TrendSeries,
};

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Idempotent on `RunID`; on conflict overwrites `notes`/`updated_at` only.
    async fn save_run(&self, result: BenchmarkResult) -> StorageResult<HistoricRun>;

    async fn get_run(&self, id: &str) -> StorageResult<HistoricRun>;

    /// Newest-first by timestamp, ties broken by `RunID` lexicographically.
    async fn list_runs(&self, filter: RunFilter) -> StorageResult<Vec<HistoricRun>>;

    async fn delete_run(&self, id: &str) -> StorageResult<()>;

    /// Order of arguments determines the direction of reported deltas.
    async fn compare_runs(&self, id1: &str, id2: &str) -> StorageResult<HistoricComparison>;

    async fn get_trends(&self, filter: TrendFilter) -> StorageResult<TrendSeries>;

    async fn get_summary(&self, filter: RunFilter) -> StorageResult<HistoricSummary>;

    async fn list_test_names(&self) -> StorageResult<Vec<String>>;

    async fn save_result_files(&self, run_id: &str, blob: Vec<u8>) -> StorageResult<()>;

    async fn get_result_files(&self, run_id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Removes blob files whose run `created_at` predates `retention`.
    /// Run rows themselves are never pruned.
    async fn cleanup_old_files(&self, retention: chrono::Duration) -> StorageResult<u64>;

    /// Used by the Grafana façade's connection test (`GET /grafana/`).
    async fn ping(&self) -> StorageResult<()>;

    // -- Baselines --

    async fn save_baseline(&self, baseline: Baseline) -> StorageResult<Baseline>;

    async fn get_baseline(&self, name: &str) -> StorageResult<Baseline>;

    async fn list_baselines(&self, test_name: Option<&str>) -> StorageResult<Vec<Baseline>>;

    async fn delete_baseline(&self, name: &str) -> StorageResult<()>;

    // -- Regressions --

    /// Replaces `run_id`'s regression detections with this batch.
    async fn save_regressions(
        &self,
        run_id: &str,
        regressions: Vec<Regression>,
    ) -> StorageResult<Vec<Regression>>;

    async fn list_regressions(&self, run_id: &str) -> StorageResult<Vec<Regression>>;

    async fn get_regression(&self, id: &str) -> StorageResult<Regression>;

    async fn acknowledge_regression(
        &self,
        id: &str,
        acknowledged_by: &str,
    ) -> StorageResult<Regression>;
}
