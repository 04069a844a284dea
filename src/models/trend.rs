use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub client: Option<String>,
    pub method: Option<String>,
    pub metric: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSeries {
    pub test_name: String,
    pub metric: String,
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub interval: ConfidenceInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendFilter {
    pub test_name: String,
    pub client: Option<String>,
    pub method: Option<String>,
    pub metric: Option<String>,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub bucket: Option<TrendBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBucket {
    Hour,
    Day,
}

impl TrendBucket {
    /// Picks hour/day buckets from the span: uniform windows aligned to
    /// UTC midnight, sized off how far back the query spans.
    pub fn for_span(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        let span = until - since;
        if span.num_hours() <= 48 {
            TrendBucket::Hour
        } else {
            TrendBucket::Day
        }
    }

    /// Floors `ts` to the start of its bucket, UTC-midnight aligned for day
    /// buckets and hour-aligned for hour buckets.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        use chrono::Timelike;
        match self {
            TrendBucket::Hour => ts
                .date_naive()
                .and_hms_opt(ts.hour(), 0, 0)
                .unwrap()
                .and_utc(),
            TrendBucket::Day => ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAveragePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendBundle {
    pub overall: TrendSeries,
    pub per_client: std::collections::HashMap<String, TrendSeries>,
}
