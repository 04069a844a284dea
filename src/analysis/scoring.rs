//! Performance analyzer: client scoring, head-to-head comparison, and
//! regression findings. The weighted-sum scoring algorithm and the
//! documented-as-heuristic p-value matrix are reproduced exactly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::ClientMetrics;

const WEIGHT_LATENCY: f64 = 0.35;
const WEIGHT_THROUGHPUT: f64 = 0.30;
const WEIGHT_ERROR_RATE: f64 = 0.25;
const WEIGHT_STABILITY: f64 = 0.10;

struct RawMetrics {
    latency: f64,
    throughput: f64,
    error_rate: f64,
    stability: f64,
}

/// Computes the four raw scoring metrics (latency, throughput, error rate,
/// stability) for one client.
fn raw_metrics(metrics: &ClientMetrics) -> RawMetrics {
    let method_count = metrics.methods.len().max(1) as f64;
    let latency = metrics.methods.values().map(|m| m.p95).sum::<f64>() / method_count;
    let throughput = metrics.methods.values().map(|m| m.throughput).sum::<f64>() / method_count;

    let stable_vars: Vec<f64> = metrics
        .methods
        .values()
        .map(|m| m.coeff_var)
        .filter(|v| *v > 0.0)
        .collect();
    let stability = if stable_vars.is_empty() {
        0.0
    } else {
        stable_vars.iter().sum::<f64>() / stable_vars.len() as f64
    };

    RawMetrics {
        latency,
        throughput,
        error_rate: metrics.error_rate,
        stability,
    }
}

/// Normalizes one metric across clients to `[0,100]`. `lower_is_better`
/// flips the direction before scaling. Ties at `max == min` map every
/// client to 50.
fn normalize(values: &HashMap<String, f64>, lower_is_better: bool) -> HashMap<String, f64> {
    if values.is_empty() {
        return HashMap::new();
    }
    let min = values.values().cloned().fold(f64::INFINITY, f64::min);
    let max = values.values().cloned().fold(f64::NEG_INFINITY, f64::max);

    values
        .iter()
        .map(|(client, &v)| {
            let score = if (max - min).abs() < f64::EPSILON {
                50.0
            } else {
                let n = (v - min) / (max - min);
                let n = if lower_is_better { 1.0 - n } else { n };
                n * 100.0
            };
            (client.clone(), score)
        })
        .collect()
}

/// Computes `PerformanceScore: clientName -> [0,100]` for every client in
/// `clients`. Returns an empty map for an empty input.
pub fn score_clients(clients: &HashMap<String, ClientMetrics>) -> HashMap<String, f64> {
    if clients.is_empty() {
        return HashMap::new();
    }

    let mut latency = HashMap::new();
    let mut throughput = HashMap::new();
    let mut error_rate = HashMap::new();
    let mut stability = HashMap::new();

    for (name, metrics) in clients {
        let raw = raw_metrics(metrics);
        latency.insert(name.clone(), raw.latency);
        throughput.insert(name.clone(), raw.throughput);
        error_rate.insert(name.clone(), raw.error_rate);
        stability.insert(name.clone(), raw.stability);
    }

    let n_latency = normalize(&latency, true);
    let n_throughput = normalize(&throughput, false);
    let n_error_rate = normalize(&error_rate, true);
    let n_stability = normalize(&stability, true);

    clients
        .keys()
        .map(|name| {
            let score = WEIGHT_LATENCY * n_latency[name]
                + WEIGHT_THROUGHPUT * n_throughput[name]
                + WEIGHT_ERROR_RATE * n_error_rate[name]
                + WEIGHT_STABILITY * n_stability[name];
            (name.clone(), score)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub winner: Option<String>,
    pub winner_score: f64,
    pub relative_perf: HashMap<String, f64>,
    pub significant_diffs: Vec<String>,
    pub p_value_matrix: HashMap<String, HashMap<String, f64>>,
}

pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(&self, clients: &HashMap<String, ClientMetrics>) -> HashMap<String, f64> {
        score_clients(clients)
    }

    /// Builds the `ComparisonResult` for a set of clients: winner, relative
    /// performance, flagged significant diffs, and the p-value matrix.
    pub fn compare(&self, clients: &HashMap<String, ClientMetrics>) -> ComparisonResult {
        let scores = score_clients(clients);
        let winner = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.clone());
        let winner_score = winner
            .as_ref()
            .and_then(|w| scores.get(w))
            .copied()
            .unwrap_or(0.0);

        let relative_perf = if winner_score > 0.0 {
            scores
                .iter()
                .map(|(name, score)| (name.clone(), 100.0 * score / winner_score))
                .collect()
        } else {
            scores.iter().map(|(name, _)| (name.clone(), 0.0)).collect()
        };

        ComparisonResult {
            winner,
            winner_score,
            relative_perf,
            significant_diffs: significant_diffs(clients),
            p_value_matrix: p_value_matrix(clients),
        }
    }

    pub fn recommendations(&self, clients: &HashMap<String, ClientMetrics>) -> Vec<String> {
        recommendations(clients)
    }

    /// Per-client regression findings vs. a baseline snapshot.
    pub fn regression_findings(
        &self,
        current: &HashMap<String, ClientMetrics>,
        baseline: &HashMap<String, ClientMetrics>,
    ) -> Vec<String> {
        let mut findings = Vec::new();
        for (client, cur) in current {
            let Some(base) = baseline.get(client) else {
                continue;
            };
            let cur_p95 = mean_field(cur, |m| m.p95);
            let base_p95 = mean_field(base, |m| m.p95);
            if base_p95 > 0.0 && (cur_p95 - base_p95) / base_p95 > 0.10 {
                findings.push(format!(
                    "{client}: P95 latency increased {:.1}% vs baseline",
                    100.0 * (cur_p95 - base_p95) / base_p95
                ));
            }
            if cur.error_rate - base.error_rate > 1.0 {
                findings.push(format!(
                    "{client}: error rate increased {:.2}pp vs baseline",
                    cur.error_rate - base.error_rate
                ));
            }
            for (method, cur_summary) in &cur.methods {
                if let Some(base_summary) = base.methods.get(method) {
                    if base_summary.throughput > 0.0
                        && (cur_summary.throughput - base_summary.throughput)
                            / base_summary.throughput
                            < -0.15
                    {
                        findings.push(format!(
                            "{client}.{method}: throughput decreased {:.1}% vs baseline",
                            100.0 * (base_summary.throughput - cur_summary.throughput)
                                / base_summary.throughput
                        ));
                    }
                }
            }
        }
        findings
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_field(metrics: &ClientMetrics, f: impl Fn(&crate::models::MetricSummary) -> f64) -> f64 {
    let count = metrics.methods.len().max(1) as f64;
    metrics.methods.values().map(f).sum::<f64>() / count
}

fn significant_diffs(clients: &HashMap<String, ClientMetrics>) -> Vec<String> {
    let mut diffs = Vec::new();
    let p95s: HashMap<String, f64> = clients
        .iter()
        .map(|(name, m)| (name.clone(), mean_field(m, |s| s.p95)))
        .collect();

    if let (Some((best_name, best_p95)), Some((worst_name, worst_p95))) = (
        p95s.iter().min_by(|a, b| a.1.total_cmp(b.1)),
        p95s.iter().max_by(|a, b| a.1.total_cmp(b.1)),
    ) {
        if *best_p95 > 0.0 && (*worst_p95 - *best_p95) / *best_p95 > 0.50 {
            diffs.push(format!(
                "client {worst_name} has {:.1}% higher P95 latency than {best_name}",
                100.0 * (*worst_p95 - *best_p95) / *best_p95
            ));
        }
    }

    for (name, metrics) in clients {
        if metrics.error_rate > 5.0 {
            diffs.push(format!(
                "client {name} has an elevated error rate ({:.2}%)",
                metrics.error_rate
            ));
        }
    }
    diffs
}

/// Heuristic p-value matrix: a ranking signal rather than a real hypothesis
/// test. Diagonal and the `mean == 0` case are both defined as `p = 1`.
fn p_value_matrix(clients: &HashMap<String, ClientMetrics>) -> HashMap<String, HashMap<String, f64>> {
    let p95s: HashMap<String, f64> = clients
        .iter()
        .map(|(name, m)| (name.clone(), mean_field(m, |s| s.p95)))
        .collect();

    let mut matrix = HashMap::new();
    for (c1, p1) in &p95s {
        let mut row = HashMap::new();
        for (c2, p2) in &p95s {
            let p = if c1 == c2 {
                1.0
            } else {
                let mean = (p1 + p2) / 2.0;
                if mean == 0.0 {
                    1.0
                } else {
                    (-10.0 * (p1 - p2).abs() / mean).exp()
                }
            };
            row.insert(c2.clone(), p);
        }
        matrix.insert(c1.clone(), row);
    }
    matrix
}

fn recommendations(clients: &HashMap<String, ClientMetrics>) -> Vec<String> {
    let mut out = Vec::new();
    for (name, metrics) in clients {
        if metrics.error_rate > 10.0 {
            out.push(format!(
                "CRITICAL: {name} error rate {:.2}% requires immediate attention",
                metrics.error_rate
            ));
        } else if metrics.error_rate > 5.0 {
            out.push(format!(
                "ELEVATED: {name} error rate {:.2}% is above the healthy threshold",
                metrics.error_rate
            ));
        }
        for (method, summary) in &metrics.methods {
            if summary.p95 > 1000.0 {
                out.push(format!(
                    "{name}.{method}: P95 latency {:.0}ms indicates a high-latency path",
                    summary.p95
                ));
            }
            if summary.coeff_var > 100.0 {
                out.push(format!(
                    "{name}.{method}: coefficient of variation {:.0}% signals unstable timing",
                    summary.coeff_var
                ));
            }
        }
    }
    if out.is_empty() {
        out.push("no performance issues detected".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSummary;

    fn client(p95: f64, throughput: f64, error_rate: f64, coeff_var: f64) -> ClientMetrics {
        let mut methods = HashMap::new();
        methods.insert(
            "call".to_string(),
            MetricSummary {
                p95,
                throughput,
                coeff_var,
                avg: p95 * 0.6,
                ..Default::default()
            },
        );
        ClientMetrics {
            error_rate,
            methods,
            ..Default::default()
        }
    }

    #[test]
    fn empty_clients_score_to_empty_map() {
        assert!(score_clients(&HashMap::new()).is_empty());
    }

    #[test]
    fn identical_clients_score_fifty() {
        let mut clients = HashMap::new();
        clients.insert("a".to_string(), client(100.0, 500.0, 1.0, 10.0));
        clients.insert("b".to_string(), client(100.0, 500.0, 1.0, 10.0));
        let scores = score_clients(&clients);
        for score in scores.values() {
            assert!((score - 50.0).abs() < 1e-9);
        }
    }

    #[test]
    fn faster_lower_error_client_scores_strictly_higher() {
        let mut clients = HashMap::new();
        clients.insert("c1".to_string(), client(100.0, 1000.0, 0.0, 10.0));
        clients.insert("c2".to_string(), client(200.0, 500.0, 1.0, 20.0));
        let scores = score_clients(&clients);
        assert!((scores["c1"] - 100.0).abs() < 1e-9);
        assert!((scores["c2"] - 0.0).abs() < 1e-9);
    }
}
