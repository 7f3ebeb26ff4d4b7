//! Partition assignment bookkeeping.
//!
//! The consumer-group client invokes assign/revoke callbacks as partition
//! ownership moves between replicas. The callbacks are serialized with
//! respect to each other by the client; the tracker's only duty is keeping
//! the owned set current. Offset commits happen inside the client before a
//! revoke callback fires, so nothing here touches offsets.
//!
//! The owned set has its own lock, deliberately separate from the tenant
//! registry's lock; the two are never taken nested.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::info;

/// Partitions grouped by topic, as delivered by the consumer-group client.
pub type PartitionAssignment = HashMap<String, Vec<i32>>;

/// Tracks the log-stream partitions this replica currently owns.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    owned: RwLock<HashSet<i32>>,
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record newly assigned partitions.
    pub fn on_assigned(&self, assignment: &PartitionAssignment) {
        let mut owned = self.owned.write().expect("assignment lock poisoned");
        for (topic, partitions) in assignment {
            info!(topic = %topic, partitions = ?partitions, "Partitions assigned");
            owned.extend(partitions.iter().copied());
        }
    }

    /// Drop revoked partitions from the owned set.
    pub fn on_revoked(&self, assignment: &PartitionAssignment) {
        let mut owned = self.owned.write().expect("assignment lock poisoned");
        for (topic, partitions) in assignment {
            info!(topic = %topic, partitions = ?partitions, "Partitions revoked");
            for partition in partitions {
                owned.remove(partition);
            }
        }
    }

    /// Sorted snapshot of the owned partitions, for diagnostics.
    pub fn assigned(&self) -> Vec<i32> {
        let owned = self.owned.read().expect("assignment lock poisoned");
        let mut partitions: Vec<i32> = owned.iter().copied().collect();
        partitions.sort_unstable();
        partitions
    }

    /// Whether this replica currently owns a partition.
    pub fn owns(&self, partition: i32) -> bool {
        self.owned
            .read()
            .expect("assignment lock poisoned")
            .contains(&partition)
    }
}
