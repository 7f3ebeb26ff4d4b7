//! Per-tenant storage: WAL + remote-forward fanout.
//!
//! One `TenantStorage` per tenant, owned by that tenant's instance. Open
//! wipes any crash-leftover WAL directory, recreates it, and wires the fused
//! append target; close unwinds everything and removes the directory again.

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::forward::{tenant_forward_config, ForwardConfig, Forwarder, RemoteSink};
use crate::metrics::FORWARD_CONFIG_UPDATE_FAILED;
use crate::overrides::Overrides;
use crate::sample::Sample;
use crate::wal::Wal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct TenantStorage {
    tenant: String,
    dir: PathBuf,

    wal: Wal,
    forwarder: Arc<Forwarder>,

    watcher_stop: watch::Sender<bool>,
    watcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TenantStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStorage")
            .field("tenant", &self.tenant)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl TenantStorage {
    /// Open a tenant's storage: wipe leftovers, create the WAL directory,
    /// apply the forward configuration, and start the override watcher.
    pub async fn open(
        cfg: &StorageConfig,
        overrides: Arc<dyn Overrides>,
        tenant: &str,
        sink: Arc<dyn RemoteSink>,
    ) -> Result<Self> {
        if cfg.path.as_os_str().is_empty() {
            return Err(StorageError::Unconfigured);
        }

        let dir = cfg.path.join(tenant);

        // Clean the WAL before everything; leftovers from a crash are not
        // replayed, the remote sink's retries are the durability mechanism.
        info!(tenant = %tenant, dir = %dir.display(), "Clearing old WAL on start up");
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(tenant = %tenant, error = %e, "Failed to remove WAL on start up");
            }
        }

        // Create both <dir> and <dir>/wal. The forwarding writer logs a
        // confusing error when the wal subdirectory is missing.
        info!(tenant = %tenant, dir = %dir.display(), "Creating WAL");
        let wal_dir = dir.join("wal");
        fs::create_dir_all(&wal_dir).await?;

        let initial = tenant_forward_config(tenant, overrides.as_ref(), cfg.add_org_id_header);

        let wal = Wal::open(&wal_dir, cfg.flush_deadline).await?;

        let forwarder =
            match Forwarder::new(tenant, sink, initial.clone(), cfg.forward_queue_capacity) {
                Ok(forwarder) => Arc::new(forwarder),
                Err(e) => {
                    let _ = wal.close().await;
                    return Err(e);
                }
            };

        let (watcher_stop, stop_rx) = watch::channel(false);
        let watcher = spawn_override_watcher(
            tenant.to_string(),
            overrides,
            Arc::clone(&forwarder),
            initial,
            cfg.poll_interval,
            cfg.add_org_id_header,
            stop_rx,
        );

        Ok(Self {
            tenant: tenant.to_string(),
            dir,
            wal,
            forwarder,
            watcher_stop,
            watcher: tokio::sync::Mutex::new(Some(watcher)),
        })
    }

    /// Append samples to both halves of the fanout. A forward-side problem
    /// never aborts the WAL write; WAL errors propagate.
    pub async fn append(&self, samples: &[Sample]) -> Result<()> {
        self.forwarder.enqueue(samples.to_vec());
        self.wal.append(samples).await
    }

    /// Flush the WAL to disk.
    pub async fn flush(&self) -> Result<()> {
        self.wal.flush().await
    }

    /// Stop the watcher, close WAL and forwarder, and remove the tenant's
    /// WAL directory.
    pub async fn close(&self) -> Result<()> {
        info!(tenant = %self.tenant, dir = %self.dir.display(), "Closing WAL");

        let _ = self.watcher_stop.send(true);
        if let Some(watcher) = self.watcher.lock().await.take() {
            let _ = watcher.await;
        }

        let mut errors: Vec<String> = Vec::new();
        if let Err(e) = self.wal.close().await {
            errors.push(e.to_string());
        }
        if let Err(e) = self.forwarder.close().await {
            errors.push(e.to_string());
        }

        // Remove the WAL at shutdown; forwarding already saw every sample,
        // so nothing on disk is useful to a future restart.
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Close(errors.join("; ")))
        }
    }

    /// Active forward configuration (for diagnostics).
    pub fn forward_config(&self) -> ForwardConfig {
        self.forwarder.config()
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_override_watcher(
    tenant: String,
    overrides: Arc<dyn Overrides>,
    forwarder: Arc<Forwarder>,
    applied: ForwardConfig,
    poll_interval: std::time::Duration,
    add_org_id_header: bool,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the config was just applied.
        ticker.tick().await;

        // Last configuration we attempted to apply. Deliberately updated
        // before the attempt: a failed reapply is counted once per change,
        // not once per poll.
        let mut applied = applied;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    match changed {
                        Ok(()) if !*stop_rx.borrow() => continue,
                        // Stop requested, or the storage went away.
                        _ => break,
                    }
                }
            }

            let desired = tenant_forward_config(&tenant, overrides.as_ref(), add_org_id_header);
            if desired == applied {
                continue;
            }

            info!(tenant = %tenant, "Updating remote-forward configuration");
            applied = desired.clone();
            if let Err(e) = forwarder.apply_config(desired) {
                FORWARD_CONFIG_UPDATE_FAILED
                    .with_label_values(&[tenant.as_str()])
                    .inc();
                info!(
                    tenant = %tenant,
                    error = %e,
                    "Failed to update remote-forward configuration, forwarding continues with the previous configuration"
                );
            }
        }

        debug!(tenant = %tenant, "Override watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::StaticOverrides;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl RemoteSink for NullSink {
        async fn send(
            &self,
            _tenant: &str,
            _batch: &[Sample],
            _cfg: &ForwardConfig,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn config(root: &Path) -> StorageConfig {
        StorageConfig {
            path: root.to_path_buf(),
            flush_deadline: Duration::from_millis(10),
            poll_interval: Duration::from_millis(25),
            add_org_id_header: false,
            forward_queue_capacity: 64,
        }
    }

    async fn open(
        root: &Path,
        overrides: Arc<StaticOverrides>,
        tenant: &str,
    ) -> Result<TenantStorage> {
        TenantStorage::open(&config(root), overrides, tenant, Arc::new(NullSink)).await
    }

    #[tokio::test]
    async fn test_unconfigured_path_fails_before_io() {
        let overrides = Arc::new(StaticOverrides::new());
        let err = open(Path::new(""), overrides, "acme").await.unwrap_err();
        assert!(matches!(err, StorageError::Unconfigured));
    }

    #[tokio::test]
    async fn test_open_wipes_crash_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let tenant_dir = root.path().join("acme");

        // Simulate a crashed previous process.
        std::fs::create_dir_all(tenant_dir.join("wal")).unwrap();
        std::fs::write(tenant_dir.join("wal").join("junk.wal"), b"leftover").unwrap();

        let overrides = Arc::new(StaticOverrides::new());
        let storage = open(root.path(), overrides, "acme").await.unwrap();

        assert!(!tenant_dir.join("wal").join("junk.wal").exists());
        assert!(tenant_dir.join("wal").exists());

        storage.close().await.unwrap();
        assert!(!tenant_dir.exists());
    }

    #[tokio::test]
    async fn test_append_lands_in_wal() {
        let root = tempfile::tempdir().unwrap();
        let overrides = Arc::new(StaticOverrides::new());
        let storage = open(root.path(), overrides, "acme").await.unwrap();

        storage
            .append(&[Sample::new("spanmill_spans_total", 1, 2.0)])
            .await
            .unwrap();
        storage.flush().await.unwrap();

        let wal_file = storage.dir().join("wal").join("00000000.wal");
        assert!(std::fs::read(wal_file).unwrap().len() > 4);

        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_applies_changed_overrides() {
        let root = tempfile::tempdir().unwrap();
        let overrides = Arc::new(StaticOverrides::new());
        let storage = open(root.path(), overrides.clone(), "acme").await.unwrap();

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer fresh".to_string());
        overrides.set_headers(headers.clone());
        overrides.set_native_histograms(true);

        // Reapplied within one poll interval plus slack.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let cfg = storage.forward_config();
            if cfg.headers == headers && cfg.native_histograms {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("override change was not applied in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reapply_keeps_previous_config_and_counts() {
        let root = tempfile::tempdir().unwrap();
        let overrides = Arc::new(StaticOverrides::new());
        let tenant = "reapply-fault";
        let storage = open(root.path(), overrides.clone(), tenant).await.unwrap();

        let before_cfg = storage.forward_config();
        let before_failures = FORWARD_CONFIG_UPDATE_FAILED
            .with_label_values(&[tenant])
            .get();

        // An empty header name fails forward-config validation.
        let mut headers = BTreeMap::new();
        headers.insert("".to_string(), "broken".to_string());
        overrides.set_headers(headers);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let failures = FORWARD_CONFIG_UPDATE_FAILED
                .with_label_values(&[tenant])
                .get();
            if failures > before_failures {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("reapply failure was not counted in time");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // No forwarding outage: the previous configuration stays active.
        assert_eq!(storage.forward_config(), before_cfg);

        storage.close().await.unwrap();
    }
}
