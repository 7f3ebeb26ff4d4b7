//! Spanmill Ingest - Log-Stream Ingestion Seam
//!
//! The generator can consume spans from a partitioned log stream owned by a
//! consumer-group protocol. Consumption itself belongs to the streaming
//! client; this crate provides the seam the generator needs around it:
//!
//! - **BackoffPolicy / handshake**: bounded exponential-backoff connectivity
//!   probe run before the streaming path is declared healthy
//! - **AssignmentTracker**: bookkeeping of the partitions this replica
//!   currently owns, fed by the client's assign/revoke callbacks
//! - **LogSource**: the narrow async trait a streaming client implements
//! - **LoopbackSource**: in-process source for single-binary deployments
//!   and tests
//! - **OffsetClient**: committed-offset lookups, opened only after the
//!   handshake succeeds

pub mod assignment;
pub mod backoff;
pub mod error;
pub mod loopback;
pub mod source;

pub use assignment::{AssignmentTracker, PartitionAssignment};
pub use backoff::{handshake, BackoffPolicy};
pub use error::{IngestError, Result};
pub use loopback::LoopbackSource;
pub use source::{AssignmentHandler, LogSource, OffsetClient, SourceFactory};
