//! Per-tenant instance.
//!
//! One instance per tenant, created lazily on first push and destroyed only
//! during generator shutdown. It owns the tenant's storage, its registered
//! collectors, and the derived-metrics state.

use crate::error::Result;
use crate::metrics::InstanceMetrics;
use crate::processor::{MetricsQuery, MetricsResult, RangeQuery, RangeResult, Span, SpanProcessor};
use prometheus::Registry;
use spanmill_storage::TenantStorage;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct TenantInstance {
    tenant: String,
    storage: TenantStorage,
    processor: Mutex<Box<dyn SpanProcessor>>,
    metrics: InstanceMetrics,

    /// Shared registry handle, needed to unregister at shutdown.
    registry: Registry,
}

impl TenantInstance {
    pub(crate) fn new(
        tenant: String,
        storage: TenantStorage,
        processor: Box<dyn SpanProcessor>,
        metrics: InstanceMetrics,
        registry: Registry,
    ) -> Self {
        Self {
            tenant,
            storage,
            processor: Mutex::new(processor),
            metrics,
            registry,
        }
    }

    /// Feed spans through the processor and persist the derived samples.
    pub async fn push_spans(&self, spans: &[Span]) -> Result<()> {
        let now_ms = current_timestamp_ms();
        let samples = self.processor.lock().await.push(spans, now_ms);
        self.metrics.spans_received.inc_by(spans.len() as u64);

        if !samples.is_empty() {
            self.storage.append(&samples).await?;
            self.metrics.samples_appended.inc_by(samples.len() as u64);
        }
        Ok(())
    }

    pub async fn get_metrics(&self, query: &MetricsQuery) -> MetricsResult {
        self.processor.lock().await.metrics(query)
    }

    pub async fn query_range(&self, query: &RangeQuery) -> RangeResult {
        self.processor.lock().await.query_range(query)
    }

    /// Flush and close storage, then drop this tenant's collectors.
    pub async fn shutdown(&self) {
        info!(tenant = %self.tenant, "Shutting down tenant instance");

        if let Err(e) = self.storage.flush().await {
            warn!(tenant = %self.tenant, error = %e, "Failed to flush tenant storage");
        }
        if let Err(e) = self.storage.close().await {
            error!(tenant = %self.tenant, error = %e, "Failed to close tenant storage");
        }

        self.metrics.unregister_from(&self.registry);
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

/// Get current timestamp in milliseconds since epoch
fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as i64
}
