//! Error types for spanmill ingestion

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("log-stream handshake failed after {attempts} attempts: {last}")]
    HandshakeFailed { attempts: usize, last: String },

    #[error("log-stream source unavailable: {0}")]
    Unavailable(String),

    #[error("log-stream source is stopped")]
    SourceStopped,

    #[error("invalid ingest configuration: {0}")]
    Config(String),
}
