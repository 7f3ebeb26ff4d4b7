//! Generator lifecycle - the service state machine.
//!
//! The generator ties the subsystems together and owns their ordering:
//!
//! - **Starting**: ring registration first (and wait for it), then the
//!   log-stream handshake, then the auxiliary clients. Any failure tears
//!   down whatever already started.
//! - **Running**: one control loop blocking on external cancellation vs. a
//!   subsystem failure, whichever fires first.
//! - **Stopping**, in strict order: stop subsystems, grace sleep for ring
//!   propagation, flip read-only, stop consuming, shut down every tenant in
//!   parallel and wait.
//!
//! Stopping ingestion before read-only would accept work this replica is
//! about to refuse to flush; read-only before ring deregistration would
//! bounce callers while the ring still advertises this replica.

use crate::config::GeneratorConfig;
use crate::delegate::{GeneratorDelegate, RING_AUTO_FORGET_UNHEALTHY_PERIODS};
use crate::error::{GeneratorError, Result};
use crate::instance::TenantInstance;
use crate::metrics::InstanceMetrics;
use crate::processor::{
    MetricsQuery, MetricsResult, ProcessorFactory, RangeQuery, RangeResult, Span,
    SpanCountProcessor, SpanProcessor,
};
use crate::registry::TenantRegistry;
use prometheus::Registry;
use spanmill_ingest::{
    handshake, AssignmentHandler, AssignmentTracker, BackoffPolicy, LogSource, OffsetClient,
    SourceFactory,
};
use spanmill_ring::{
    AutoForgetDelegate, LeaveOnStoppingDelegate, Lifecycler, MembershipStore,
};
use spanmill_storage::{Overrides, RemoteSink, StaticOverrides, TenantStorage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{error, info, warn};

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

/// The tenant-sharded metrics generator.
pub struct Generator {
    cfg: GeneratorConfig,
    overrides: Arc<dyn Overrides>,
    registry: Registry,
    sink: Arc<dyn RemoteSink>,
    processor_factory: ProcessorFactory,
    source_factory: Option<Arc<dyn SourceFactory>>,
    handshake_policy: BackoffPolicy,

    tenants: TenantRegistry<TenantInstance>,

    lifecycler: Option<Arc<Lifecycler>>,

    source: RwLock<Option<Arc<dyn LogSource>>>,
    offset_client: RwLock<Option<OffsetClient>>,
    assignments: Arc<AssignmentTracker>,

    /// One-way: once true, pushes are refused and remaining metrics flush.
    read_only: AtomicBool,

    state: RwLock<ServiceState>,

    /// Subsystems report fatal errors here; `run` turns the first one into
    /// the service's terminal error. The sender half kept on the generator
    /// keeps the channel open even when no subsystem holds a clone.
    #[allow(dead_code)]
    failure_tx: mpsc::UnboundedSender<String>,
    failure_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("instance_id", &self.cfg.instance_id)
            .finish_non_exhaustive()
    }
}

impl Generator {
    pub fn builder() -> GeneratorBuilder {
        GeneratorBuilder::new()
    }

    /// Start the subsystems: ring membership first, then the log-stream
    /// handshake. Any failure tears down whatever started and leaves the
    /// service `Failed`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ServiceState::NotStarted {
                return Err(GeneratorError::AlreadyStarted);
            }
            *state = ServiceState::Starting;
        }

        info!(instance_id = %self.cfg.instance_id, "Starting metrics generator");

        match self.start_subsystems().await {
            Ok(()) => {
                *self.state.write().await = ServiceState::Running;
                info!(instance_id = %self.cfg.instance_id, "Metrics generator running");
                Ok(())
            }
            Err(e) => {
                error!(
                    instance_id = %self.cfg.instance_id,
                    error = %e,
                    "Failed to start metrics generator"
                );

                if let Some(lifecycler) = &self.lifecycler {
                    if lifecycler.is_registered() {
                        if let Err(stop_err) = lifecycler.stop().await {
                            error!(
                                error = %stop_err,
                                "Failed to gracefully stop ring lifecycler after startup failure"
                            );
                        }
                    }
                }

                *self.state.write().await = ServiceState::Failed;
                Err(e)
            }
        }
    }

    async fn start_subsystems(&self) -> Result<()> {
        if let Some(lifecycler) = &self.lifecycler {
            // Start awaits ring registration, so a healthy return here means
            // readiness can flip.
            lifecycler.start().await?;
        }

        if self.cfg.ingest.enabled {
            let factory = self
                .source_factory
                .as_ref()
                .ok_or_else(|| {
                    GeneratorError::Config("ingestion enabled but no source factory".into())
                })?;

            let source = factory.create(Arc::clone(&self.assignments) as Arc<dyn AssignmentHandler>)?;

            if let Err(e) = handshake(source.as_ref(), &self.handshake_policy).await {
                let _ = source.stop().await;
                return Err(e.into());
            }

            // Auxiliary clients open only after the handshake succeeded.
            *self.offset_client.write().await =
                Some(OffsetClient::new(Arc::clone(&source), &self.cfg.ingest.topic));
            *self.source.write().await = Some(source);
        }

        Ok(())
    }

    /// Block until an external shutdown request or a subsystem failure,
    /// whichever fires first. Cancellation returns `Ok`; a subsystem failure
    /// becomes the service's terminal error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.state().await != ServiceState::Running {
            return Err(GeneratorError::NotRunning);
        }

        let mut failures = self
            .failure_rx
            .lock()
            .await
            .take()
            .ok_or(GeneratorError::NotRunning)?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(()) => {
                            if *shutdown.borrow() {
                                info!("Shutdown requested");
                                return Ok(());
                            }
                        }
                        // The shutdown sender vanished; treat as a request.
                        Err(_) => return Ok(()),
                    }
                }
                Some(failure) = failures.recv() => {
                    return Err(GeneratorError::Subsystem(failure));
                }
            }
        }
    }

    /// The stop sequence, in strict order.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ServiceState::Stopping | ServiceState::Terminated => return Ok(()),
                ServiceState::NotStarted | ServiceState::Starting => {
                    warn!("Generator not running, skipping stop");
                    return Ok(());
                }
                ServiceState::Running | ServiceState::Failed => *state = ServiceState::Stopping,
            }
        }

        info!(instance_id = %self.cfg.instance_id, "Stopping metrics generator");

        // 1. Stop started subsystems and await their clean shutdown.
        if let Some(lifecycler) = &self.lifecycler {
            if let Err(e) = lifecycler.stop().await {
                error!(error = %e, "Failed to stop ring lifecycler");
            }
        }

        // 2. Let the ring propagate the shutdown.
        tokio::time::sleep(self.cfg.shutdown_grace).await;

        // 3. Mark as read-only after we have removed ourselves from the ring.
        self.stop_incoming_requests();

        // 4. Stop reading from the stream and wait for outstanding data to
        //    be processed and committed.
        if let Some(source) = self.source.write().await.take() {
            if let Err(e) = source.stop().await {
                error!(error = %e, "Failed to stop log-stream source");
            }
        }

        // 5. Shut down every cached tenant in parallel and wait for all.
        let instances = self.tenants.drain().await;
        info!(tenants = instances.len(), "Shutting down tenant instances");

        let mut tasks = Vec::with_capacity(instances.len());
        for instance in instances {
            tasks.push(tokio::spawn(async move { instance.shutdown().await }));
        }
        let join_all = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(self.cfg.instance_shutdown_timeout, join_all)
            .await
            .is_err()
        {
            error!(
                timeout_secs = self.cfg.instance_shutdown_timeout.as_secs(),
                "Timed out waiting for tenant instances to shut down"
            );
        }

        *self.state.write().await = ServiceState::Terminated;
        info!(instance_id = %self.cfg.instance_id, "Metrics generator stopped");
        Ok(())
    }

    /// Mark the generator read-only, refusing push requests.
    fn stop_incoming_requests(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }

    /// Apply spans to the tenant's derived-metrics path.
    pub async fn push_spans(&self, tenant: &str, spans: &[Span]) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(GeneratorError::ReadOnly);
        }
        if tenant.is_empty() {
            return Err(GeneratorError::MissingTenant);
        }

        let instance = self
            .tenants
            .get_or_create(tenant, || self.create_instance(tenant))
            .await?;
        instance.push_spans(spans).await
    }

    /// Instant query. Returns an empty result when the tenant has no
    /// instance yet.
    pub async fn get_metrics(&self, tenant: &str, query: &MetricsQuery) -> Result<MetricsResult> {
        if tenant.is_empty() {
            return Err(GeneratorError::MissingTenant);
        }

        match self.tenants.get(tenant).await {
            Some(instance) => Ok(instance.get_metrics(query).await),
            None => Ok(MetricsResult::default()),
        }
    }

    /// Range query. Same empty-if-absent contract as [`Self::get_metrics`].
    pub async fn query_range(&self, tenant: &str, query: &RangeQuery) -> Result<RangeResult> {
        if tenant.is_empty() {
            return Err(GeneratorError::MissingTenant);
        }

        match self.tenants.get(tenant).await {
            Some(instance) => Ok(instance.query_range(query).await),
            None => Ok(RangeResult::default()),
        }
    }

    /// Ready once registered in the ring; always ready without a ring.
    pub fn check_ready(&self) -> Result<()> {
        match &self.lifecycler {
            None => Ok(()),
            Some(lifecycler) if lifecycler.is_registered() => Ok(()),
            Some(_) => Err(GeneratorError::NotRegistered),
        }
    }

    async fn create_instance(&self, tenant: &str) -> Result<Arc<TenantInstance>> {
        // Collectors stay detached until the whole construction succeeded;
        // a tenant whose WAL was created but whose instance failed must be
        // retryable without a duplicate-registration blowup.
        let metrics = InstanceMetrics::new(tenant)
            .map_err(|e| GeneratorError::Metrics(e.to_string()))?;

        let storage = TenantStorage::open(
            &self.cfg.storage,
            Arc::clone(&self.overrides),
            tenant,
            Arc::clone(&self.sink),
        )
        .await?;

        let processor = (self.processor_factory)(tenant);

        if let Err(e) = metrics.register_into(&self.registry) {
            // Roll back everything acquired so far; the registry stays
            // unchanged and the next push retries cleanly.
            if let Err(close_err) = storage.close().await {
                error!(
                    tenant = %tenant,
                    error = %close_err,
                    "Failed to roll back tenant storage after metric registration failure"
                );
            }
            return Err(GeneratorError::Metrics(e.to_string()));
        }

        Ok(Arc::new(TenantInstance::new(
            tenant.to_string(),
            storage,
            processor,
            metrics,
            self.registry.clone(),
        )))
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Partitions this replica currently owns, for diagnostics.
    pub fn assigned_partitions(&self) -> Vec<i32> {
        self.assignments.assigned()
    }

    /// Last committed offset for a partition, when ingestion is running.
    pub async fn committed_offset(&self, partition: i32) -> Option<i64> {
        self.offset_client
            .read()
            .await
            .as_ref()
            .and_then(|client| client.committed(partition))
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.len().await
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.cfg
    }
}

/// Builder for [`Generator`].
pub struct GeneratorBuilder {
    cfg: Option<GeneratorConfig>,
    overrides: Option<Arc<dyn Overrides>>,
    registry: Option<Registry>,
    sink: Option<Arc<dyn RemoteSink>>,
    ring_store: Option<Arc<dyn MembershipStore>>,
    source_factory: Option<Arc<dyn SourceFactory>>,
    processor_factory: Option<ProcessorFactory>,
    handshake_policy: BackoffPolicy,
}

impl GeneratorBuilder {
    pub fn new() -> Self {
        Self {
            cfg: None,
            overrides: None,
            registry: None,
            sink: None,
            ring_store: None,
            source_factory: None,
            processor_factory: None,
            handshake_policy: BackoffPolicy::default(),
        }
    }

    pub fn config(mut self, cfg: GeneratorConfig) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn overrides(mut self, overrides: Arc<dyn Overrides>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Shared process-wide Prometheus registry for per-tenant collectors.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RemoteSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Membership store; required when ring participation is enabled.
    pub fn ring_store(mut self, store: Arc<dyn MembershipStore>) -> Self {
        self.ring_store = Some(store);
        self
    }

    /// Log-stream source factory; required when ingestion is enabled.
    pub fn source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub fn processor_factory(mut self, factory: ProcessorFactory) -> Self {
        self.processor_factory = Some(factory);
        self
    }

    pub fn handshake_policy(mut self, policy: BackoffPolicy) -> Self {
        self.handshake_policy = policy;
        self
    }

    pub fn build(self) -> Result<Generator> {
        let cfg = self
            .cfg
            .ok_or_else(|| GeneratorError::Config("config is required".into()))?;

        if cfg.storage.path.as_os_str().is_empty() {
            return Err(GeneratorError::Unconfigured);
        }
        cfg.validate()?;

        let sink = self
            .sink
            .ok_or_else(|| GeneratorError::Config("remote sink is required".into()))?;

        if cfg.ingest.enabled && self.source_factory.is_none() {
            return Err(GeneratorError::Config(
                "ingestion enabled but no source factory".into(),
            ));
        }

        std::fs::create_dir_all(&cfg.storage.path)
            .map_err(|e| GeneratorError::Storage(e.into()))?;

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let lifecycler = match &cfg.ring {
            Some(ring) => {
                let store = self.ring_store.ok_or_else(|| {
                    GeneratorError::Config(
                        "ring participation enabled but no membership store".into(),
                    )
                })?;

                let forget_period = ring.heartbeat_timeout * RING_AUTO_FORGET_UNHEALTHY_PERIODS;
                let delegate = Arc::new(AutoForgetDelegate::new(
                    forget_period,
                    LeaveOnStoppingDelegate::new(GeneratorDelegate),
                ));

                Some(Arc::new(Lifecycler::new(
                    ring.to_lifecycler_config(&cfg.instance_id),
                    store,
                    delegate,
                    Some(failure_tx.clone()),
                )))
            }
            None => None,
        };

        let overrides = self
            .overrides
            .unwrap_or_else(|| Arc::new(StaticOverrides::new()));
        let processor_factory = self.processor_factory.unwrap_or_else(|| {
            Arc::new(|_tenant: &str| Box::new(SpanCountProcessor::new()) as Box<dyn SpanProcessor>)
        });

        Ok(Generator {
            cfg,
            overrides,
            registry: self.registry.unwrap_or_default(),
            sink,
            processor_factory,
            source_factory: self.source_factory,
            handshake_policy: self.handshake_policy,
            tenants: TenantRegistry::new(),
            lifecycler,
            source: RwLock::new(None),
            offset_client: RwLock::new(None),
            assignments: Arc::new(AssignmentTracker::new()),
            read_only: AtomicBool::new(false),
            state: RwLock::new(ServiceState::NotStarted),
            failure_tx,
            failure_rx: Mutex::new(Some(failure_rx)),
        })
    }
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
