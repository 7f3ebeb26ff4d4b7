//! Remote-forward queue.
//!
//! The forwarder is the remote half of the fanout: appended samples are
//! queued and drained to a [`RemoteSink`] by a background task, with
//! per-batch retries. Its configuration (headers, histogram mode) can be
//! swapped at runtime; a swap that fails validation leaves the previous
//! working configuration active.
//!
//! The queue is bounded. When it is full, samples are dropped and counted
//! rather than blocking ingestion: the WAL still holds the data, and the
//! sink's retry semantics are the durability mechanism of record.

use crate::error::{Result, StorageError};
use crate::metrics::{FORWARD_DROPPED_SAMPLES, FORWARD_FAILED_BATCHES};
use crate::sample::Sample;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Header carrying the tenant identity to the remote sink.
pub const ORG_ID_HEADER: &str = "X-Scope-OrgID";

/// Forward retry schedule: first wait, cap, attempts per batch.
const RETRY_INITIAL: Duration = Duration::from_millis(100);
const RETRY_MAX: Duration = Duration::from_secs(5);
const RETRY_ATTEMPTS: usize = 5;

/// Active remote-forward configuration for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardConfig {
    /// Headers attached to every forwarded batch
    pub headers: BTreeMap<String, String>,

    /// Forward native histograms instead of classic ones
    pub native_histograms: bool,
}

/// Build a tenant's forward configuration from its overrides.
pub fn tenant_forward_config(
    tenant: &str,
    overrides: &dyn crate::overrides::Overrides,
    add_org_id_header: bool,
) -> ForwardConfig {
    let mut headers = overrides.remote_write_headers(tenant);
    if add_org_id_header {
        headers
            .entry(ORG_ID_HEADER.to_string())
            .or_insert_with(|| tenant.to_string());
    }

    ForwardConfig {
        headers,
        native_histograms: overrides.native_histograms(tenant),
    }
}

fn validate_config(cfg: &ForwardConfig) -> Result<()> {
    for (name, value) in &cfg.headers {
        if name.is_empty() {
            return Err(StorageError::ForwardConfig("empty header name".into()));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(StorageError::ForwardConfig(format!(
                "invalid header name: {name:?}"
            )));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(StorageError::ForwardConfig(format!(
                "invalid value for header {name}"
            )));
        }
    }
    Ok(())
}

/// The remote write target.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn send(&self, tenant: &str, batch: &[Sample], cfg: &ForwardConfig) -> Result<()>;
}

/// Queues samples and drains them to the remote sink.
pub struct Forwarder {
    tenant: String,
    cfg: Arc<RwLock<ForwardConfig>>,

    /// Dropped on close so the drain task sees end-of-queue.
    tx: Mutex<Option<mpsc::Sender<Vec<Sample>>>>,

    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Forwarder {
    pub fn new(
        tenant: &str,
        sink: Arc<dyn RemoteSink>,
        initial: ForwardConfig,
        queue_capacity: usize,
    ) -> Result<Self> {
        validate_config(&initial)?;

        let cfg = Arc::new(RwLock::new(initial));
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let task = spawn_drain(tenant.to_string(), sink, Arc::clone(&cfg), rx);

        Ok(Self {
            tenant: tenant.to_string(),
            cfg,
            tx: Mutex::new(Some(tx)),
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Swap the active configuration. On validation failure the previous
    /// configuration stays active and the error is returned.
    pub fn apply_config(&self, new: ForwardConfig) -> Result<()> {
        validate_config(&new)?;
        *self.cfg.write().expect("forward config lock poisoned") = new;
        Ok(())
    }

    /// Snapshot of the active configuration.
    pub fn config(&self) -> ForwardConfig {
        self.cfg.read().expect("forward config lock poisoned").clone()
    }

    /// Queue a batch for forwarding. Never blocks; on overflow the batch is
    /// dropped and counted.
    pub fn enqueue(&self, batch: Vec<Sample>) {
        if batch.is_empty() {
            return;
        }

        let count = batch.len() as u64;
        let guard = self.tx.lock().expect("forward sender lock poisoned");
        let dropped = match guard.as_ref() {
            Some(tx) => tx.try_send(batch).is_err(),
            None => true,
        };

        if dropped {
            FORWARD_DROPPED_SAMPLES
                .with_label_values(&[self.tenant.as_str()])
                .inc_by(count);
            warn!(
                tenant = %self.tenant,
                samples = count,
                "Forward queue full or closed, dropping samples"
            );
        }
    }

    /// Stop accepting batches, drain the queue, and join the drain task.
    pub async fn close(&self) -> Result<()> {
        self.tx.lock().expect("forward sender lock poisoned").take();

        if let Some(task) = self.task.lock().await.take() {
            task.await?;
        }
        Ok(())
    }
}

fn spawn_drain(
    tenant: String,
    sink: Arc<dyn RemoteSink>,
    cfg: Arc<RwLock<ForwardConfig>>,
    mut rx: mpsc::Receiver<Vec<Sample>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let snapshot = cfg.read().expect("forward config lock poisoned").clone();
            send_with_retry(&tenant, sink.as_ref(), &batch, &snapshot).await;
        }
        debug!(tenant = %tenant, "Forward queue drained");
    })
}

async fn send_with_retry(tenant: &str, sink: &dyn RemoteSink, batch: &[Sample], cfg: &ForwardConfig) {
    let mut wait = RETRY_INITIAL;

    for attempt in 0..RETRY_ATTEMPTS {
        match sink.send(tenant, batch, cfg).await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    tenant = %tenant,
                    attempt = attempt + 1,
                    error = %e,
                    "Remote forward failed"
                );
            }
        }

        if attempt + 1 < RETRY_ATTEMPTS {
            tokio::time::sleep(wait).await;
            wait = (wait * 2).min(RETRY_MAX);
        }
    }

    FORWARD_FAILED_BATCHES.with_label_values(&[tenant]).inc();
    error!(
        tenant = %tenant,
        samples = batch.len(),
        "Dropping batch after exhausting forward retries"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::{Overrides, StaticOverrides};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink that records batches and can fail the first N sends.
    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<(Vec<Sample>, ForwardConfig)>>,
        failures: AtomicUsize,
    }

    impl RecordingSink {
        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteSink for RecordingSink {
        async fn send(&self, _tenant: &str, batch: &[Sample], cfg: &ForwardConfig) -> Result<()> {
            let remaining = self.failures.load(Ordering::Acquire);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Release);
                return Err(StorageError::Sink("injected send failure".into()));
            }
            self.batches
                .lock()
                .unwrap()
                .push((batch.to_vec(), cfg.clone()));
            Ok(())
        }
    }

    fn sample() -> Sample {
        Sample::new("spanmill_spans_total", 1, 1.0)
    }

    #[tokio::test]
    async fn test_enqueue_reaches_sink() {
        let sink = Arc::new(RecordingSink::default());
        let forwarder =
            Forwarder::new("acme", sink.clone(), ForwardConfig::default(), 16).unwrap();

        forwarder.enqueue(vec![sample(), sample()]);
        forwarder.close().await.unwrap();

        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.batches.lock().unwrap()[0].0.len(), 2);
    }

    #[tokio::test]
    async fn test_batches_carry_active_config() {
        let sink = Arc::new(RecordingSink::default());
        let forwarder =
            Forwarder::new("acme", sink.clone(), ForwardConfig::default(), 16).unwrap();

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer x".to_string());
        forwarder
            .apply_config(ForwardConfig {
                headers: headers.clone(),
                native_histograms: true,
            })
            .unwrap();

        forwarder.enqueue(vec![sample()]);
        forwarder.close().await.unwrap();

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches[0].1.headers, headers);
        assert!(batches[0].1.native_histograms);
    }

    #[tokio::test]
    async fn test_invalid_config_keeps_previous() {
        let sink = Arc::new(RecordingSink::default());
        let mut headers = BTreeMap::new();
        headers.insert("X-Good".to_string(), "yes".to_string());
        let initial = ForwardConfig {
            headers,
            native_histograms: false,
        };
        let forwarder = Forwarder::new("acme", sink, initial.clone(), 16).unwrap();

        let mut bad_headers = BTreeMap::new();
        bad_headers.insert("".to_string(), "oops".to_string());
        let err = forwarder
            .apply_config(ForwardConfig {
                headers: bad_headers,
                native_histograms: false,
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::ForwardConfig(_)));

        assert_eq!(forwarder.config(), initial);
        forwarder.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_sink_failures_are_retried() {
        let sink = Arc::new(RecordingSink {
            failures: AtomicUsize::new(2),
            ..Default::default()
        });
        let forwarder =
            Forwarder::new("acme", sink.clone(), ForwardConfig::default(), 16).unwrap();

        forwarder.enqueue(vec![sample()]);
        forwarder.close().await.unwrap();

        assert_eq!(sink.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_drops_and_counts() {
        let sink = Arc::new(RecordingSink::default());
        let forwarder = Forwarder::new("drop-test", sink, ForwardConfig::default(), 16).unwrap();
        forwarder.close().await.unwrap();

        let before = FORWARD_DROPPED_SAMPLES
            .with_label_values(&["drop-test"])
            .get();
        forwarder.enqueue(vec![sample()]);
        let after = FORWARD_DROPPED_SAMPLES
            .with_label_values(&["drop-test"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_org_id_header_injection() {
        let overrides = StaticOverrides::new();
        let cfg = tenant_forward_config("acme", &overrides, true);
        assert_eq!(cfg.headers.get(ORG_ID_HEADER), Some(&"acme".to_string()));

        // An explicit override wins over injection.
        let mut headers = BTreeMap::new();
        headers.insert(ORG_ID_HEADER.to_string(), "other".to_string());
        overrides.set_headers(headers);
        let cfg = tenant_forward_config("acme", &overrides, true);
        assert_eq!(cfg.headers.get(ORG_ID_HEADER), Some(&"other".to_string()));

        let cfg = tenant_forward_config("acme", &StaticOverrides::new(), false);
        assert!(cfg.headers.is_empty());
    }
}
