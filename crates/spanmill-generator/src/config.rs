//! Generator configuration.

use crate::error::{GeneratorError, Result};
use serde::{Deserialize, Serialize};
use spanmill_ring::LifecyclerConfig;
use spanmill_storage::StorageConfig;
use std::time::Duration;

/// Ring participation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Address advertised to ring peers
    pub addr: String,

    /// How often to heartbeat (default: 20s)
    #[serde(default = "default_heartbeat_period", with = "duration_ms")]
    pub heartbeat_period: Duration,

    /// Heartbeat age after which peers consider this replica dead (default: 60s)
    #[serde(default = "default_heartbeat_timeout", with = "duration_ms")]
    pub heartbeat_timeout: Duration,
}

fn default_heartbeat_period() -> Duration {
    Duration::from_secs(20)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(60)
}

impl RingConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            heartbeat_period: default_heartbeat_period(),
            heartbeat_timeout: default_heartbeat_timeout(),
        }
    }

    pub(crate) fn to_lifecycler_config(&self, replica_id: &str) -> LifecyclerConfig {
        let mut cfg = LifecyclerConfig::new(replica_id, self.addr.clone());
        cfg.heartbeat_period = self.heartbeat_period;
        cfg.heartbeat_timeout = self.heartbeat_timeout;
        cfg
    }
}

/// Log-stream ingestion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Consume spans from a log stream
    #[serde(default)]
    pub enabled: bool,

    /// Topic carrying span batches
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "spans".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_topic(),
        }
    }
}

/// Top-level generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// This replica's ID, also its ring identity
    pub instance_id: String,

    pub storage: StorageConfig,

    /// Ring participation; `None` runs ringless (always ready)
    #[serde(default)]
    pub ring: Option<RingConfig>,

    #[serde(default)]
    pub ingest: IngestConfig,

    /// Pause between ring deregistration and refusing pushes, letting the
    /// deregistration propagate to routers (default: 5s)
    #[serde(default = "default_shutdown_grace", with = "duration_ms")]
    pub shutdown_grace: Duration,

    /// Bound on the parallel per-tenant shutdown at stop (default: 60s)
    #[serde(default = "default_instance_shutdown_timeout", with = "duration_ms")]
    pub instance_shutdown_timeout: Duration,
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_instance_shutdown_timeout() -> Duration {
    Duration::from_secs(60)
}

impl GeneratorConfig {
    pub fn new(instance_id: impl Into<String>, storage: StorageConfig) -> Self {
        Self {
            instance_id: instance_id.into(),
            storage,
            ring: None,
            ingest: IngestConfig::default(),
            shutdown_grace: default_shutdown_grace(),
            instance_shutdown_timeout: default_instance_shutdown_timeout(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            return Err(GeneratorError::Config("instance_id is required".into()));
        }
        if let Some(ring) = &self.ring {
            ring.to_lifecycler_config(&self.instance_id).validate()?;
        }
        if self.ingest.enabled && self.ingest.topic.is_empty() {
            return Err(GeneratorError::Config(
                "ingest.topic is required when ingestion is enabled".into(),
            ));
        }
        Ok(())
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
