//! Lifecycler - register, heartbeat, deregister.
//!
//! Drives one replica's membership in the ring:
//!
//! 1. **Register**: claim tokens via the delegate, under the store's
//!    exclusive section so concurrent registrations cannot collide.
//! 2. **Heartbeat**: background task refreshing the replica's timestamp and
//!    giving the delegate chain a chance to prune the ring.
//! 3. **Deregister**: on stop, let the delegate update the ring a final time,
//!    then remove the replica proactively rather than waiting to be
//!    forgotten by peers.
//!
//! Persistent heartbeat failure (3 consecutive store errors) is reported on
//! the failure channel and ends the heartbeat loop; the owning service
//! decides whether that is fatal.

use crate::delegate::LifecyclerDelegate;
use crate::error::{Result, RingError};
use crate::state::{current_timestamp_ms, ReplicaDesc, RingState};
use crate::store::MembershipStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consecutive heartbeat failures tolerated before escalating.
const HEARTBEAT_FAILURE_THRESHOLD: u64 = 3;

/// Lifecycler configuration.
#[derive(Debug, Clone)]
pub struct LifecyclerConfig {
    /// Unique replica ID within the ring
    pub replica_id: String,

    /// Replica address advertised to peers
    pub addr: String,

    /// How often to heartbeat (default: 20s)
    pub heartbeat_period: Duration,

    /// Heartbeat age after which peers consider this replica dead (default: 60s)
    pub heartbeat_timeout: Duration,
}

impl LifecyclerConfig {
    pub fn new(replica_id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
            addr: addr.into(),
            heartbeat_period: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_id.is_empty() {
            return Err(RingError::InvalidConfig("replica_id is required".into()));
        }
        if self.addr.is_empty() {
            return Err(RingError::InvalidConfig("addr is required".into()));
        }
        if self.heartbeat_period.is_zero() {
            return Err(RingError::InvalidConfig(
                "heartbeat_period must be non-zero".into(),
            ));
        }
        if self.heartbeat_timeout < self.heartbeat_period {
            return Err(RingError::InvalidConfig(
                "heartbeat_timeout must be at least heartbeat_period".into(),
            ));
        }
        Ok(())
    }
}

/// Drives one replica's ring membership.
pub struct Lifecycler {
    cfg: LifecyclerConfig,
    store: Arc<dyn MembershipStore>,
    delegate: Arc<dyn LifecyclerDelegate>,

    /// Set once registration completed; readiness reads this.
    registered: AtomicBool,

    /// Notified when the heartbeat loop gives up.
    failure: Option<mpsc::UnboundedSender<String>>,

    heartbeat_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Lifecycler {
    pub fn new(
        cfg: LifecyclerConfig,
        store: Arc<dyn MembershipStore>,
        delegate: Arc<dyn LifecyclerDelegate>,
        failure: Option<mpsc::UnboundedSender<String>>,
    ) -> Self {
        Self {
            cfg,
            store,
            delegate,
            registered: AtomicBool::new(false),
            failure,
            heartbeat_handle: RwLock::new(None),
        }
    }

    /// Register in the ring and start the heartbeat task.
    pub async fn start(&self) -> Result<()> {
        self.cfg.validate()?;

        let mut handle_guard = self.heartbeat_handle.write().await;
        if handle_guard.is_some() {
            return Err(RingError::AlreadyStarted);
        }

        let tokens = self.register().await?;
        self.delegate.on_tokens_observed(&tokens);
        self.registered.store(true, Ordering::Release);

        info!(
            replica_id = %self.cfg.replica_id,
            addr = %self.cfg.addr,
            tokens = tokens.len(),
            "Registered in the ring"
        );

        *handle_guard = Some(self.spawn_heartbeat());
        Ok(())
    }

    /// Deregister from the ring and stop the heartbeat task.
    pub async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.heartbeat_handle.write().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let id = self.cfg.replica_id.clone();
        let delegate = Arc::clone(&self.delegate);
        self.store
            .update(Box::new(move |ring: &mut RingState| {
                delegate.on_stopping(&id, ring);
                ring.replicas.remove(&id);
            }))
            .await?;

        self.registered.store(false, Ordering::Release);
        info!(replica_id = %self.cfg.replica_id, "Deregistered from the ring");
        Ok(())
    }

    /// True once this replica registered in the ring.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &LifecyclerConfig {
        &self.cfg
    }

    async fn register(&self) -> Result<Vec<u32>> {
        let id = self.cfg.replica_id.clone();
        let addr = self.cfg.addr.clone();
        let delegate = Arc::clone(&self.delegate);

        let after = self
            .store
            .update(Box::new(move |ring: &mut RingState| {
                let existing = ring.replicas.get(&id).cloned();
                let (state, mut tokens) = delegate.on_register(ring, existing.as_ref());
                tokens.sort_unstable();
                tokens.dedup();

                let now = current_timestamp_ms();
                let registered_at_ms = existing.map(|d| d.registered_at_ms).unwrap_or(now);
                ring.replicas.insert(
                    id.clone(),
                    ReplicaDesc {
                        addr,
                        state,
                        tokens,
                        heartbeat_ms: now,
                        registered_at_ms,
                    },
                );
            }))
            .await?;

        Ok(after
            .replica(&self.cfg.replica_id)
            .map(|desc| desc.tokens.clone())
            .unwrap_or_default())
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let id = self.cfg.replica_id.clone();
        let period = self.cfg.heartbeat_period;
        let store = Arc::clone(&self.store);
        let delegate = Arc::clone(&self.delegate);
        let failure = self.failure.clone();

        tokio::spawn(async move {
            let mut consecutive_failures: u64 = 0;

            loop {
                tokio::time::sleep(period).await;

                let beat_id = id.clone();
                let beat_delegate = Arc::clone(&delegate);
                let result = store
                    .update(Box::new(move |ring: &mut RingState| {
                        beat_delegate.on_heartbeat(&beat_id, ring);
                        if let Some(desc) = ring.replicas.get_mut(&beat_id) {
                            desc.heartbeat_ms = current_timestamp_ms();
                        }
                    }))
                    .await;

                match result {
                    Ok(_) => {
                        consecutive_failures = 0;
                        debug!(replica_id = %id, "Ring heartbeat sent");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            replica_id = %id,
                            error = %e,
                            consecutive_failures,
                            "Ring heartbeat failed"
                        );

                        if consecutive_failures >= HEARTBEAT_FAILURE_THRESHOLD {
                            warn!(
                                replica_id = %id,
                                "Giving up on ring heartbeat after repeated failures"
                            );
                            if let Some(tx) = &failure {
                                let _ = tx.send(format!("ring heartbeat failed: {e}"));
                            }
                            break;
                        }
                    }
                }
            }
        })
    }
}
