//! Spanmill Storage - Per-Tenant WAL + Remote-Forward Fanout
//!
//! Each tenant gets a fused append target: every appended sample is buffered
//! durably in a local write-ahead log and handed to a remote-forward queue,
//! as one logical operation. A forward failure never aborts the local write;
//! the forwarder's own retry queue is the durability mechanism of record.
//!
//! ## Lifecycle
//!
//! ```text
//! open:   wipe <path>/<tenant>/  →  create <path>/<tenant>/wal/
//!         →  build forward config from overrides  →  open WAL
//!         →  start override watcher (30s poll)
//! append: WAL + forward queue (fanout)
//! close:  stop watcher  →  close WAL + forwarder  →  delete <path>/<tenant>/
//! ```
//!
//! Crash leftovers are discarded at open, and the directory is removed at
//! close: nothing is replayed across restarts.

pub mod config;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod overrides;
pub mod sample;
pub mod tenant;
pub mod wal;

pub use config::StorageConfig;
pub use error::{Result, StorageError};
pub use forward::{tenant_forward_config, ForwardConfig, Forwarder, RemoteSink, ORG_ID_HEADER};
pub use overrides::{Overrides, StaticOverrides};
pub use sample::Sample;
pub use tenant::TenantStorage;
pub use wal::Wal;
