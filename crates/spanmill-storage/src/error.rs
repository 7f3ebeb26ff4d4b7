//! Error types for spanmill per-tenant storage

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no metrics storage path configured, metrics generation is disabled")]
    Unconfigured,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL is closed")]
    WalClosed,

    #[error("WAL write failed: {0}")]
    Wal(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid forward configuration: {0}")]
    ForwardConfig(String),

    #[error("remote sink error: {0}")]
    Sink(String),

    #[error("close failed: {0}")]
    Close(String),

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
