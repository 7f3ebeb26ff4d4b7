//! Generator lifecycle integration tests.
//!
//! Exercises the full service state machine with instrumented fakes: the
//! stop ordering (read-only before source stop before tenant shutdown),
//! race-free tenant creation, construction rollback, readiness, and
//! subsystem-failure escalation.

use async_trait::async_trait;
use prometheus::Registry;
use spanmill_generator::{
    Generator, GeneratorConfig, GeneratorError, InstanceMetrics, MetricsQuery, RangeQuery,
    RingConfig, ServiceState, Span,
};
use spanmill_ingest::{
    AssignmentHandler, BackoffPolicy, IngestError, LogSource, LoopbackSource, SourceFactory,
};
use spanmill_ring::{
    MembershipStore, MemoryMembershipStore, RingMutation, RingState,
};
use spanmill_storage::{ForwardConfig, RemoteSink, Sample, StorageConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

struct NullSink;

#[async_trait]
impl RemoteSink for NullSink {
    async fn send(
        &self,
        _tenant: &str,
        _batch: &[Sample],
        _cfg: &ForwardConfig,
    ) -> spanmill_storage::Result<()> {
        Ok(())
    }
}

/// Source that records what it observes at the moment `stop` is called.
#[derive(Default)]
struct InstrumentedSource {
    ping_failures: AtomicUsize,
    stopped: AtomicBool,
    on_stop: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl InstrumentedSource {
    fn fail_next_pings(&self, n: usize) {
        self.ping_failures.store(n, Ordering::Release);
    }

    fn set_on_stop(&self, probe: impl Fn() + Send + Sync + 'static) {
        *self.on_stop.lock().unwrap() = Some(Box::new(probe));
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LogSource for InstrumentedSource {
    async fn ping(&self) -> spanmill_ingest::Result<()> {
        let remaining = self.ping_failures.load(Ordering::Acquire);
        if remaining > 0 {
            self.ping_failures.store(remaining - 1, Ordering::Release);
            return Err(IngestError::Unavailable("injected ping failure".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> spanmill_ingest::Result<()> {
        if let Some(probe) = self.on_stop.lock().unwrap().as_ref() {
            probe();
        }
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }

    fn committed_offset(&self, _topic: &str, _partition: i32) -> Option<i64> {
        None
    }
}

/// Factory handing out one pre-built source.
struct FixedFactory {
    source: Arc<InstrumentedSource>,
}

impl SourceFactory for FixedFactory {
    fn create(
        &self,
        _handler: Arc<dyn AssignmentHandler>,
    ) -> spanmill_ingest::Result<Arc<dyn LogSource>> {
        Ok(Arc::clone(&self.source) as Arc<dyn LogSource>)
    }
}

/// Factory wiring a loopback source to the generator's tracker.
#[derive(Default)]
struct LoopbackFactory {
    slot: Mutex<Option<Arc<LoopbackSource>>>,
}

impl SourceFactory for LoopbackFactory {
    fn create(
        &self,
        handler: Arc<dyn AssignmentHandler>,
    ) -> spanmill_ingest::Result<Arc<dyn LogSource>> {
        let source = Arc::new(LoopbackSource::with_handler("spans", handler));
        *self.slot.lock().unwrap() = Some(Arc::clone(&source));
        Ok(source as Arc<dyn LogSource>)
    }
}

/// Membership store that starts failing once poisoned.
struct PoisonableStore {
    inner: MemoryMembershipStore,
    poisoned: AtomicBool,
}

impl PoisonableStore {
    fn new() -> Self {
        Self {
            inner: MemoryMembershipStore::new(),
            poisoned: AtomicBool::new(false),
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }
}

#[async_trait]
impl MembershipStore for PoisonableStore {
    async fn update(&self, mutate: RingMutation) -> spanmill_ring::Result<RingState> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(spanmill_ring::RingError::Store("store unavailable".into()));
        }
        self.inner.update(mutate).await
    }

    async fn get(&self) -> spanmill_ring::Result<RingState> {
        self.inner.get().await
    }
}

fn span() -> Span {
    Span {
        service: "cart".to_string(),
        name: "GET /items".to_string(),
        duration_ms: 12,
        error: false,
    }
}

fn fast_config(root: &Path) -> GeneratorConfig {
    let mut cfg = GeneratorConfig::new(
        "replica-1",
        StorageConfig {
            path: root.to_path_buf(),
            flush_deadline: Duration::from_millis(10),
            poll_interval: Duration::from_millis(200),
            add_org_id_header: false,
            forward_queue_capacity: 64,
        },
    );
    cfg.shutdown_grace = Duration::from_millis(20);
    cfg.instance_shutdown_timeout = Duration::from_secs(5);
    cfg
}

fn fast_ring() -> RingConfig {
    let mut ring = RingConfig::new("127.0.0.1:9090");
    ring.heartbeat_period = Duration::from_millis(20);
    ring.heartbeat_timeout = Duration::from_millis(100);
    ring
}

fn fast_handshake() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn test_stop_ordering_read_only_then_source_then_instances() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("metrics");

    let mut cfg = fast_config(&root);
    cfg.ring = Some(fast_ring());
    cfg.ingest.enabled = true;

    let ring_store = Arc::new(MemoryMembershipStore::new());
    let source = Arc::new(InstrumentedSource::default());

    let generator = Arc::new(
        Generator::builder()
            .config(cfg)
            .sink(Arc::new(NullSink))
            .ring_store(ring_store.clone())
            .source_factory(Arc::new(FixedFactory {
                source: Arc::clone(&source),
            }))
            .handshake_policy(fast_handshake())
            .build()
            .unwrap(),
    );

    // Not ready until registered in the ring.
    assert!(matches!(
        generator.check_ready(),
        Err(GeneratorError::NotRegistered)
    ));

    generator.start().await.unwrap();
    generator.check_ready().unwrap();
    assert_eq!(generator.state().await, ServiceState::Running);

    let ring = ring_store.get().await.unwrap();
    assert_eq!(ring.replica("replica-1").unwrap().tokens.len(), 256);

    generator.push_spans("acme", &[span()]).await.unwrap();
    generator.push_spans("globex", &[span()]).await.unwrap();
    assert_eq!(generator.tenant_count().await, 2);

    // Unknown tenants answer queries with empty results, not errors.
    let empty = generator
        .get_metrics("nobody", &MetricsQuery::default())
        .await
        .unwrap();
    assert!(empty.series.is_empty());
    let empty = generator
        .query_range("nobody", &RangeQuery::default())
        .await
        .unwrap();
    assert!(empty.series.is_empty());

    // Record what the world looks like the moment the source is stopped.
    let observed = Arc::new(Mutex::new(Vec::<(bool, usize)>::new()));
    {
        let generator = Arc::clone(&generator);
        let observed = Arc::clone(&observed);
        let root = root.clone();
        source.set_on_stop(move || {
            let tenant_dirs = std::fs::read_dir(&root).map(|it| it.count()).unwrap_or(0);
            observed
                .lock()
                .unwrap()
                .push((generator.read_only(), tenant_dirs));
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = {
        let generator = Arc::clone(&generator);
        tokio::spawn(async move { generator.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    run_handle.await.unwrap().unwrap();

    generator.stop().await.unwrap();

    // Ordering: read-only was already set when the source stopped, and no
    // tenant had been shut down yet (their WAL dirs were still on disk).
    let observed = observed.lock().unwrap();
    assert_eq!(observed.len(), 1);
    let (read_only_at_source_stop, tenant_dirs_at_source_stop) = observed[0];
    assert!(read_only_at_source_stop);
    assert_eq!(tenant_dirs_at_source_stop, 2);
    assert!(source.is_stopped());

    // Post-stop: everything unwound.
    assert_eq!(generator.state().await, ServiceState::Terminated);
    assert_eq!(generator.tenant_count().await, 0);
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    assert!(ring_store.get().await.unwrap().is_empty());
    assert!(generator.check_ready().is_err());

    // A push after read-only gets the distinguished sentinel and mutates
    // nothing.
    let err = generator.push_spans("acme", &[span()]).await.unwrap_err();
    assert!(matches!(err, GeneratorError::ReadOnly));
    assert_eq!(generator.tenant_count().await, 0);
    assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_concurrent_first_pushes_create_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("metrics");
    let mut cfg = fast_config(&root);
    cfg.shutdown_grace = Duration::from_millis(1);

    let generator = Arc::new(
        Generator::builder()
            .config(cfg)
            .sink(Arc::new(NullSink))
            .build()
            .unwrap(),
    );
    generator.start().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let generator = Arc::clone(&generator);
        handles.push(tokio::spawn(async move {
            generator.push_spans("acme", &[span()]).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(generator.tenant_count().await, 1);

    // All sixteen pushes landed on the single instance.
    let metrics = generator
        .get_metrics("acme", &MetricsQuery::default())
        .await
        .unwrap();
    assert_eq!(metrics.series.len(), 1);
    assert_eq!(metrics.series[0].value, 16.0);

    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_handshake_exhaustion_fails_start_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir.path().join("metrics"));
    cfg.ring = Some(fast_ring());
    cfg.ingest.enabled = true;

    let ring_store = Arc::new(MemoryMembershipStore::new());
    let source = Arc::new(InstrumentedSource::default());
    source.fail_next_pings(usize::MAX);

    let generator = Generator::builder()
        .config(cfg)
        .sink(Arc::new(NullSink))
        .ring_store(ring_store.clone())
        .source_factory(Arc::new(FixedFactory {
            source: Arc::clone(&source),
        }))
        .handshake_policy(fast_handshake())
        .build()
        .unwrap();

    let err = generator.start().await.unwrap_err();
    assert!(matches!(
        err,
        GeneratorError::Ingest(IngestError::HandshakeFailed { attempts: 3, .. })
    ));
    assert_eq!(generator.state().await, ServiceState::Failed);

    // The ring registration was rolled back.
    assert!(ring_store.get().await.unwrap().is_empty());
    assert!(generator.check_ready().is_err());
}

#[tokio::test]
async fn test_subsystem_failure_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir.path().join("metrics"));
    cfg.ring = Some(fast_ring());
    cfg.shutdown_grace = Duration::from_millis(1);

    let ring_store = Arc::new(PoisonableStore::new());

    let generator = Arc::new(
        Generator::builder()
            .config(cfg)
            .sink(Arc::new(NullSink))
            .ring_store(ring_store.clone())
            .build()
            .unwrap(),
    );
    generator.start().await.unwrap();

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = {
        let generator = Arc::clone(&generator);
        tokio::spawn(async move { generator.run(shutdown_rx).await })
    };

    ring_store.poison();

    let result = tokio::time::timeout(Duration::from_secs(2), run_handle)
        .await
        .expect("run did not observe the subsystem failure")
        .unwrap();
    assert!(matches!(result, Err(GeneratorError::Subsystem(_))));

    // The stop sequence still runs to completion.
    generator.stop().await.unwrap();
    assert_eq!(generator.state().await, ServiceState::Terminated);
}

#[tokio::test]
async fn test_instance_construction_rolls_back_and_retries_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("metrics");
    let mut cfg = fast_config(&root);
    cfg.shutdown_grace = Duration::from_millis(1);

    // Leftover collectors from a half-failed earlier attempt occupy the
    // tenant's metric names in the shared registry.
    let shared = Registry::new();
    let leftover = InstanceMetrics::new("acme").unwrap();
    leftover.register_into(&shared).unwrap();

    let generator = Generator::builder()
        .config(cfg)
        .registry(shared.clone())
        .sink(Arc::new(NullSink))
        .build()
        .unwrap();
    generator.start().await.unwrap();

    let err = generator.push_spans("acme", &[span()]).await.unwrap_err();
    assert!(matches!(err, GeneratorError::Metrics(_)));

    // Full rollback: nothing cached, the tenant's WAL directory is gone.
    assert_eq!(generator.tenant_count().await, 0);
    assert!(!root.join("acme").exists());

    // Once the collision is gone the same push succeeds.
    leftover.unregister_from(&shared);
    generator.push_spans("acme", &[span()]).await.unwrap();
    assert_eq!(generator.tenant_count().await, 1);
    assert!(root.join("acme").join("wal").exists());

    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_partition_assignment_flows_from_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir.path().join("metrics"));
    cfg.ingest.enabled = true;
    cfg.shutdown_grace = Duration::from_millis(1);

    let factory = Arc::new(LoopbackFactory::default());
    let generator = Generator::builder()
        .config(cfg)
        .sink(Arc::new(NullSink))
        .source_factory(factory.clone())
        .handshake_policy(fast_handshake())
        .build()
        .unwrap();
    generator.start().await.unwrap();

    let source = factory.slot.lock().unwrap().clone().unwrap();

    source.assign(&[0, 1, 2]);
    assert_eq!(generator.assigned_partitions(), vec![0, 1, 2]);

    // A revoke commits the in-flight offset before the bookkeeping runs.
    source.observe(1, 42);
    source.revoke(&[1]);
    assert_eq!(generator.assigned_partitions(), vec![0, 2]);
    assert_eq!(generator.committed_offset(1).await, Some(42));

    generator.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_tenant_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = fast_config(&dir.path().join("metrics"));
    cfg.shutdown_grace = Duration::from_millis(1);

    let generator = Generator::builder()
        .config(cfg)
        .sink(Arc::new(NullSink))
        .build()
        .unwrap();
    generator.start().await.unwrap();

    assert!(matches!(
        generator.push_spans("", &[span()]).await,
        Err(GeneratorError::MissingTenant)
    ));
    assert!(matches!(
        generator.get_metrics("", &MetricsQuery::default()).await,
        Err(GeneratorError::MissingTenant)
    ));

    generator.stop().await.unwrap();
}
