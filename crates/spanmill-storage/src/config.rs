//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Per-tenant storage configuration.
///
/// `path` is required; an empty path makes construction fail with
/// [`crate::StorageError::Unconfigured`] before any directory is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each tenant gets `<path>/<tenant>/wal/`
    pub path: PathBuf,

    /// How long appended samples may sit unflushed in the WAL (default: 2s)
    #[serde(default = "default_flush_deadline", with = "duration_ms")]
    pub flush_deadline: Duration,

    /// How often the override watcher polls for changes (default: 30s)
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Inject the tenant ID as an org-ID header on forwarded batches
    #[serde(default)]
    pub add_org_id_header: bool,

    /// Forward queue depth before samples are dropped (default: 4096)
    #[serde(default = "default_forward_queue_capacity")]
    pub forward_queue_capacity: usize,
}

fn default_flush_deadline() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_forward_queue_capacity() -> usize {
    4096
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            flush_deadline: default_flush_deadline(),
            poll_interval: default_poll_interval(),
            add_org_id_header: false,
            forward_queue_capacity: default_forward_queue_capacity(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
