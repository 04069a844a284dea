use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity band for a detected regression. Ordered so that `cmp`/`Ord`
/// reflects the monotonic-in-percent-change relationship between bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Minor,
    Medium,
    Major,
    High,
    Critical,
}

/// A single flagged comparison finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Regression {
    pub id: String,
    pub run_id: String,
    pub baseline_run_id: String,
    pub client: String,
    /// Empty string means "overall" (not scoped to one method).
    #[serde(default)]
    pub method: String,
    pub metric: String,
    pub baseline_value: f64,
    pub current_value: f64,
    pub absolute_change: f64,
    pub percent_change: f64,
    pub severity: Severity,
    pub is_significant: bool,
    pub p_value: Option<f64>,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Regression {
    pub fn is_overall(&self) -> bool {
        self.method.is_empty()
    }
}

/// `RegressionDetector::detect_regressions` result bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    pub run_id: String,
    pub baseline_run_id: String,
    pub regressions: Vec<Regression>,
    pub comparison_mode: ComparisonMode,
}

/// Tagged-variant encoding of the comparison mode, dispatched on exhaustively
/// rather than through stringly-typed branching at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ComparisonMode {
    Sequential { lookback_count: u32 },
    Baseline { baseline_name: String },
    Window { window_size: u32 },
}

impl Default for ComparisonMode {
    fn default() -> Self {
        ComparisonMode::Sequential { lookback_count: 1 }
    }
}

/// Threshold bands (minor, major, critical) for one metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub minor: f64,
    pub major: f64,
    pub critical: f64,
}

impl ThresholdBand {
    pub const fn new(minor: f64, major: f64, critical: f64) -> Self {
        Self {
            minor,
            major,
            critical,
        }
    }

    /// Classifies an absolute percent/point change against this band,
    /// returning `None` when it does not clear even the minor threshold.
    pub fn classify(&self, abs_change: f64) -> Option<Severity> {
        if abs_change >= self.critical {
            Some(Severity::Critical)
        } else if abs_change >= self.major {
            Some(Severity::Major)
        } else if abs_change >= self.minor {
            Some(Severity::Minor)
        } else {
            None
        }
    }
}

/// Options controlling `RegressionDetector::detect_regressions`.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionOptions {
    #[serde(default)]
    pub comparison_mode: ComparisonMode,
    #[serde(default)]
    pub enable_statistical: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default)]
    pub custom_thresholds: std::collections::HashMap<String, ThresholdBand>,
    #[serde(default)]
    pub include_clients: Vec<String>,
    #[serde(default)]
    pub exclude_clients: Vec<String>,
    #[serde(default)]
    pub include_methods: Vec<String>,
    #[serde(default)]
    pub exclude_methods: Vec<String>,
    #[serde(default)]
    pub ignore_improvements: bool,
}

fn default_min_confidence() -> f64 {
    0.95
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            comparison_mode: ComparisonMode::default(),
            enable_statistical: false,
            min_confidence: default_min_confidence(),
            custom_thresholds: std::collections::HashMap::new(),
            include_clients: Vec::new(),
            exclude_clients: Vec::new(),
            include_methods: Vec::new(),
            exclude_methods: Vec::new(),
            ignore_improvements: false,
        }
    }
}

impl DetectionOptions {
    /// Whether `client` survives the include/exclude filters (include wins,
    /// empty include means "all").
    pub fn client_allowed(&self, client: &str) -> bool {
        if !self.include_clients.is_empty() {
            return self.include_clients.iter().any(|c| c == client);
        }
        !self.exclude_clients.iter().any(|c| c == client)
    }

    pub fn method_allowed(&self, method: &str) -> bool {
        if !self.include_methods.is_empty() {
            return self.include_methods.iter().any(|m| m == method);
        }
        !self.exclude_methods.iter().any(|m| m == method)
    }
}

/// Bundled output of `RegressionDetector::analyze_run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAnalysis {
    pub run_id: String,
    pub overall_score: f64,
    pub regression_count: usize,
    pub improvement_count: usize,
    pub per_client: std::collections::HashMap<String, f64>,
    pub recommendations: Vec<String>,
    pub trend_direction: TrendDirection,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
    Unknown,
}
