//! The analysis pipeline (C2–C5): scoring, baseline management, trend
//! analysis, and regression detection composed over the storage port.

pub mod baseline;
pub mod regression;
pub mod scoring;
pub mod trends;

pub use baseline::BaselineManager;
pub use regression::RegressionDetector;
pub use scoring::PerformanceAnalyzer;
pub use trends::TrendAnalyzer;
