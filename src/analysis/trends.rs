//! Trend Analyzer (C4): time-bucketed series, moving averages, and
//! short-horizon forecasts over a test's history.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::error::AppError;
use crate::models::{
    ConfidenceInterval, ForecastPoint, MovingAveragePoint, TrendBundle, TrendFilter, TrendSeries,
};
use crate::storage::Storage;

pub struct TrendAnalyzer {
    storage: Arc<dyn Storage>,
}

impl TrendAnalyzer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn window(days: u32) -> Result<(chrono::DateTime<Utc>, chrono::DateTime<Utc>), AppError> {
        if !(1..=365).contains(&days) {
            return Err(AppError::Validation("days must be 1-365".into()));
        }
        let until = Utc::now();
        let since = until - Duration::days(days as i64);
        Ok((since, until))
    }

    pub async fn calculate_trends(
        &self,
        test_name: &str,
        days: u32,
    ) -> Result<TrendBundle, AppError> {
        let (since, until) = Self::window(days)?;
        let overall = self
            .storage
            .get_trends(TrendFilter {
                test_name: test_name.to_string(),
                client: None,
                method: None,
                metric: None,
                since,
                until,
                bucket: None,
            })
            .await?;

        let runs = self
            .storage
            .list_runs(crate::models::RunFilter {
                test_name: Some(test_name.to_string()),
                from: Some(since),
                to: Some(until),
                limit: crate::models::RunFilter::MAX_LIMIT,
                ..Default::default()
            })
            .await?;

        let mut client_names: Vec<String> = runs
            .iter()
            .flat_map(|r| r.full_results.clients.keys().cloned())
            .collect();
        client_names.sort();
        client_names.dedup();

        let mut per_client = std::collections::HashMap::new();
        for client in client_names {
            let series = self
                .storage
                .get_trends(TrendFilter {
                    test_name: test_name.to_string(),
                    client: Some(client.clone()),
                    method: None,
                    metric: None,
                    since,
                    until,
                    bucket: None,
                })
                .await?;
            per_client.insert(client, series);
        }

        Ok(TrendBundle { overall, per_client })
    }

    pub async fn get_client_trends(
        &self,
        test_name: &str,
        client: &str,
        days: u32,
    ) -> Result<TrendSeries, AppError> {
        let (since, until) = Self::window(days)?;
        Ok(self
            .storage
            .get_trends(TrendFilter {
                test_name: test_name.to_string(),
                client: Some(client.to_string()),
                method: None,
                metric: None,
                since,
                until,
                bucket: None,
            })
            .await?)
    }

    /// Aggregates the requested method's metric across every client that
    /// exercised it, bucketed the same way the overall series is.
    pub async fn get_method_trends(
        &self,
        test_name: &str,
        method: &str,
        days: u32,
    ) -> Result<TrendSeries, AppError> {
        let (since, until) = Self::window(days)?;
        Ok(self
            .storage
            .get_trends(TrendFilter {
                test_name: test_name.to_string(),
                client: None,
                method: Some(method.to_string()),
                metric: None,
                since,
                until,
                bucket: None,
            })
            .await?)
    }

    /// Trailing moving average; points start at index `window_size - 1` to
    /// avoid emitting partial windows.
    pub async fn calculate_moving_average(
        &self,
        test_name: &str,
        metric: &str,
        window_size: usize,
        days: u32,
    ) -> Result<Vec<MovingAveragePoint>, AppError> {
        if window_size == 0 {
            return Err(AppError::Validation("window_size must be >= 1".into()));
        }
        let (since, until) = Self::window(days)?;
        let series = self
            .storage
            .get_trends(TrendFilter {
                test_name: test_name.to_string(),
                client: None,
                method: None,
                metric: Some(metric.to_string()),
                since,
                until,
                bucket: None,
            })
            .await?;

        let points = &series.points;
        if points.len() < window_size {
            return Ok(Vec::new());
        }

        Ok((window_size - 1..points.len())
            .map(|i| {
                let window = &points[i + 1 - window_size..=i];
                let avg = window.iter().map(|p| p.value).sum::<f64>() / window_size as f64;
                MovingAveragePoint {
                    timestamp: points[i].timestamp,
                    value: avg,
                }
            })
            .collect())
    }

    /// Simple linear regression over the available history, with a 95% CI
    /// per forecast point derived from the residual standard error.
    pub async fn forecast_trend(
        &self,
        test_name: &str,
        metric: &str,
        history_days: u32,
        forecast_days: u32,
    ) -> Result<Vec<ForecastPoint>, AppError> {
        if forecast_days == 0 {
            return Err(AppError::Validation("forecast_days must be >= 1".into()));
        }
        let (since, until) = Self::window(history_days)?;
        let series = self
            .storage
            .get_trends(TrendFilter {
                test_name: test_name.to_string(),
                client: None,
                method: None,
                metric: Some(metric.to_string()),
                since,
                until,
                bucket: None,
            })
            .await?;

        if series.points.len() < 2 {
            return Ok(Vec::new());
        }

        let xs: Vec<f64> = (0..series.points.len()).map(|i| i as f64).collect();
        let ys: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        let (slope, intercept, residual_se) = linear_regression(&xs, &ys);

        let bucket_span = until - since;
        let bucket_seconds = bucket_span.num_seconds().max(1) as f64 / series.points.len() as f64;
        let last_ts = series.points.last().unwrap().timestamp;
        let n = series.points.len() as f64;

        Ok((1..=forecast_days as i64)
            .map(|step| {
                let x = n - 1.0 + step as f64;
                let value = intercept + slope * x;
                let margin = 1.96 * residual_se;
                ForecastPoint {
                    timestamp: last_ts + Duration::seconds((bucket_seconds * step as f64) as i64),
                    value,
                    interval: ConfidenceInterval {
                        lower: value - margin,
                        upper: value + margin,
                    },
                }
            })
            .collect())
    }
}

/// Returns `(slope, intercept, residual_standard_error)`.
fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
    }
    let slope = if var_x == 0.0 { 0.0 } else { cov / var_x };
    let intercept = mean_y - slope * mean_x;

    let residual_sum_sq: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| {
            let predicted = intercept + slope * x;
            (y - predicted).powi(2)
        })
        .sum();
    let residual_se = if n > 2.0 {
        (residual_sum_sq / (n - 2.0)).sqrt()
    } else {
        0.0
    };

    (slope, intercept, residual_se)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_regression_recovers_exact_line() {
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![1.0, 3.0, 5.0, 7.0];
        let (slope, intercept, residual_se) = linear_regression(&xs, &ys);
        assert!((slope - 2.0).abs() < 1e-9);
        assert!((intercept - 1.0).abs() < 1e-9);
        assert!(residual_se.abs() < 1e-9);
    }
}
