//! The sample type flowing through the fanout.

use serde::{Deserialize, Serialize};

/// A single derived-metric sample bound for the tenant's WAL and the remote
/// sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Metric name
    pub metric: String,

    /// Label pairs, sorted by label name
    pub labels: Vec<(String, String)>,

    /// Milliseconds since Unix epoch
    pub timestamp_ms: i64,

    pub value: f64,
}

impl Sample {
    pub fn new(metric: impl Into<String>, timestamp_ms: i64, value: f64) -> Self {
        Self {
            metric: metric.into(),
            labels: Vec::new(),
            timestamp_ms,
            value,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((name.into(), value.into()));
        self.labels.sort();
        self
    }
}
