//! Ring state snapshot types.
//!
//! The ring is a map from replica ID to descriptor. A descriptor carries the
//! replica's address, ownership tokens, state, and last heartbeat timestamp.
//! Snapshots are plain values; all mutation goes through the membership store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of a single replica within the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaState {
    /// Serving traffic and eligible for work.
    Active,
    /// Gracefully leaving; still visible until deregistration completes.
    Leaving,
}

/// Everything the ring knows about one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaDesc {
    /// Replica address (e.g., "10.0.1.5:9090")
    pub addr: String,

    /// Current replica state
    pub state: ReplicaState,

    /// Ownership tokens, kept sorted
    pub tokens: Vec<u32>,

    /// Last heartbeat, milliseconds since Unix epoch
    pub heartbeat_ms: i64,

    /// First registration, milliseconds since Unix epoch
    pub registered_at_ms: i64,
}

/// Snapshot of the full ring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RingState {
    /// Replica ID → descriptor
    pub replicas: BTreeMap<String, ReplicaDesc>,
}

impl RingState {
    /// All tokens currently claimed by any replica, sorted.
    pub fn taken_tokens(&self) -> Vec<u32> {
        let mut tokens: Vec<u32> = self
            .replicas
            .values()
            .flat_map(|desc| desc.tokens.iter().copied())
            .collect();
        tokens.sort_unstable();
        tokens
    }

    /// Descriptor for a replica, if present.
    pub fn replica(&self, id: &str) -> Option<&ReplicaDesc> {
        self.replicas.get(id)
    }

    /// Number of registered replicas.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// True when no replica is registered.
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}

/// Get current timestamp in milliseconds since epoch
pub(crate) fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as i64
}
