//! Error types for the spanmill generator

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GeneratorError>;

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Construction refused: nothing can run without a storage path.
    #[error("no metrics storage path configured, metrics generation is disabled")]
    Unconfigured,

    /// Distinguished sentinel: the generator refuses pushes during
    /// shutdown. Callers should reroute to another replica, not retry here.
    #[error("metrics generator is shutting down")]
    ReadOnly,

    #[error("metrics generator already started")]
    AlreadyStarted,

    #[error("metrics generator is not running")]
    NotRunning,

    #[error("no tenant id provided")]
    MissingTenant,

    #[error("check ready failed: not registered in the ring")]
    NotRegistered,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("ring error: {0}")]
    Ring(#[from] spanmill_ring::RingError),

    #[error("ingest error: {0}")]
    Ingest(#[from] spanmill_ingest::IngestError),

    #[error("storage error: {0}")]
    Storage(#[from] spanmill_storage::StorageError),

    #[error("tenant metric registration failed: {0}")]
    Metrics(String),

    #[error("subsystem failed: {0}")]
    Subsystem(String),
}
