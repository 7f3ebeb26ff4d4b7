//! Spanmill Generator - Tenant-Sharded Metrics Generation
//!
//! The generator is the metrics-generation tier of a tracing backend: spans
//! come in (direct push or log-stream), per-tenant derived metrics go out
//! through a local WAL fused with a remote-forward queue.
//!
//! ## Components
//!
//! - **Generator**: the service state machine wiring everything together
//! - **TenantRegistry**: race-free get-or-create of per-tenant instances
//! - **TenantInstance**: one tenant's storage + derived-metrics state
//! - **GeneratorDelegate**: this tier's ring membership behavior
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spanmill_generator::{Generator, GeneratorConfig, Span};
//! use spanmill_storage::StorageConfig;
//! # use spanmill_storage::{ForwardConfig, RemoteSink, Sample};
//! # struct MySink;
//! # #[tonic::async_trait]
//! # impl RemoteSink for MySink {
//! #     async fn send(&self, _: &str, _: &[Sample], _: &ForwardConfig) -> spanmill_storage::Result<()> {
//! #         Ok(())
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut storage = StorageConfig::default();
//! storage.path = "/var/spanmill".into();
//!
//! let generator = Generator::builder()
//!     .config(GeneratorConfig::new("replica-1", storage))
//!     .sink(Arc::new(MySink))
//!     .build()?;
//!
//! generator.start().await?;
//! generator
//!     .push_spans(
//!         "acme",
//!         &[Span {
//!             service: "cart".into(),
//!             name: "GET /items".into(),
//!             duration_ms: 12,
//!             error: false,
//!         }],
//!     )
//!     .await?;
//! generator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod generator;
pub mod instance;
pub mod metrics;
pub mod processor;
pub mod registry;

pub use config::{GeneratorConfig, IngestConfig, RingConfig};
pub use context::{
    http_no_generate_metrics, no_generate_metrics, rpc_no_generate_metrics,
    NO_GENERATE_METRICS_KEY,
};
pub use delegate::{GeneratorDelegate, RING_AUTO_FORGET_UNHEALTHY_PERIODS, RING_TOKEN_COUNT};
pub use error::{GeneratorError, Result};
pub use generator::{Generator, GeneratorBuilder, ServiceState};
pub use instance::TenantInstance;
pub use metrics::InstanceMetrics;
pub use processor::{
    MetricsQuery, MetricsResult, ProcessorFactory, RangeQuery, RangeResult, RangeSeries, Series,
    Span, SpanCountProcessor, SpanProcessor,
};
pub use registry::TenantRegistry;
