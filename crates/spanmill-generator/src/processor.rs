//! The span-to-metrics seam.
//!
//! The actual derivation algorithm is an external collaborator; the
//! generator only needs a processor it can feed spans into and query back
//! out of. `SpanCountProcessor` is the in-tree implementation: per-operation
//! span counts with a cumulative history for range queries.

use spanmill_storage::Sample;
use std::collections::HashMap;
use std::sync::Arc;

/// A span as seen by the metrics path. Wire framing stays with the
/// transport; this is the digested form.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Emitting service
    pub service: String,

    /// Operation name
    pub name: String,

    pub duration_ms: u64,

    /// Span ended with an error status
    pub error: bool,
}

/// Instant-query request.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    /// Restrict to one service; `None` returns all
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub metric: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Instant-query response. Empty when the tenant has no state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsResult {
    pub series: Vec<Series>,
}

/// Range-query request.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub metric: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeSeries {
    pub metric: String,
    /// (timestamp_ms, value) pairs in ascending time order
    pub points: Vec<(i64, f64)>,
}

/// Range-query response. Empty when the tenant has no state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResult {
    pub series: Vec<RangeSeries>,
}

/// Derives metrics from spans and answers queries over the derived state.
pub trait SpanProcessor: Send + Sync {
    /// Digest a batch of spans, returning the samples to persist.
    fn push(&mut self, spans: &[Span], now_ms: i64) -> Vec<Sample>;

    fn metrics(&self, query: &MetricsQuery) -> MetricsResult;

    fn query_range(&self, query: &RangeQuery) -> RangeResult;
}

/// Builds a processor for a tenant on first push.
pub type ProcessorFactory = Arc<dyn Fn(&str) -> Box<dyn SpanProcessor> + Send + Sync>;

const SPANS_TOTAL: &str = "spanmill_spans_total";
const SPAN_ERRORS_TOTAL: &str = "spanmill_span_errors_total";

/// Counts spans per (service, operation) and keeps a cumulative history for
/// range queries.
#[derive(Debug, Default)]
pub struct SpanCountProcessor {
    counts: HashMap<(String, String), u64>,
    errors: u64,
    total: u64,
    history: Vec<(i64, u64)>,
}

impl SpanCountProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpanProcessor for SpanCountProcessor {
    fn push(&mut self, spans: &[Span], now_ms: i64) -> Vec<Sample> {
        if spans.is_empty() {
            return Vec::new();
        }

        let mut touched: Vec<(String, String)> = Vec::new();
        for span in spans {
            let key = (span.service.clone(), span.name.clone());
            *self.counts.entry(key.clone()).or_default() += 1;
            if !touched.contains(&key) {
                touched.push(key);
            }
            if span.error {
                self.errors += 1;
            }
            self.total += 1;
        }
        self.history.push((now_ms, self.total));

        let mut samples: Vec<Sample> = touched
            .into_iter()
            .map(|(service, name)| {
                let count = self.counts[&(service.clone(), name.clone())];
                Sample::new(SPANS_TOTAL, now_ms, count as f64)
                    .with_label("service", service)
                    .with_label("span_name", name)
            })
            .collect();
        samples.push(Sample::new(SPAN_ERRORS_TOTAL, now_ms, self.errors as f64));
        samples
    }

    fn metrics(&self, query: &MetricsQuery) -> MetricsResult {
        let series = self
            .counts
            .iter()
            .filter(|((service, _), _)| {
                query
                    .service
                    .as_ref()
                    .map(|want| want == service)
                    .unwrap_or(true)
            })
            .map(|((service, name), count)| Series {
                metric: SPANS_TOTAL.to_string(),
                labels: vec![
                    ("service".to_string(), service.clone()),
                    ("span_name".to_string(), name.clone()),
                ],
                value: *count as f64,
            })
            .collect();
        MetricsResult { series }
    }

    fn query_range(&self, query: &RangeQuery) -> RangeResult {
        if query.metric != SPANS_TOTAL {
            return RangeResult::default();
        }

        let points: Vec<(i64, f64)> = self
            .history
            .iter()
            .filter(|(ts, _)| *ts >= query.start_ms && *ts <= query.end_ms)
            .map(|(ts, total)| (*ts, *total as f64))
            .collect();

        if points.is_empty() {
            return RangeResult::default();
        }

        RangeResult {
            series: vec![RangeSeries {
                metric: SPANS_TOTAL.to_string(),
                points,
            }],
        }
    }
}
