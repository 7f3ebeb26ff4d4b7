//! Error types for spanmill ring membership

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RingError>;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("lifecycler already started")]
    AlreadyStarted,

    #[error("invalid ring configuration: {0}")]
    InvalidConfig(String),

    #[error("membership store error: {0}")]
    Store(String),
}
