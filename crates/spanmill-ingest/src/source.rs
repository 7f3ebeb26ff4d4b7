//! Log-source traits and the offset client.
//!
//! `LogSource` is the narrow seam a streaming client implements for the
//! generator: a connectivity probe, a graceful stop, and committed-offset
//! lookups. Record consumption stays inside the client; the generator only
//! coordinates around it.

use crate::assignment::{AssignmentTracker, PartitionAssignment};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Callbacks a source invokes when the consumer group reassigns partitions.
///
/// Invocations are serialized with respect to each other for a given
/// replica; implementations never see concurrent assign/revoke calls.
pub trait AssignmentHandler: Send + Sync {
    fn on_assigned(&self, assignment: &PartitionAssignment);
    fn on_revoked(&self, assignment: &PartitionAssignment);
}

impl AssignmentHandler for AssignmentTracker {
    fn on_assigned(&self, assignment: &PartitionAssignment) {
        AssignmentTracker::on_assigned(self, assignment)
    }

    fn on_revoked(&self, assignment: &PartitionAssignment) {
        AssignmentTracker::on_revoked(self, assignment)
    }
}

/// A partitioned log-stream source.
///
/// Assignment callbacks are installed at construction; see
/// [`SourceFactory`].
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Connectivity probe. Cheap; invoked repeatedly during the startup
    /// handshake.
    async fn ping(&self) -> Result<()>;

    /// Stop consuming. In-flight partitions are committed before this
    /// returns.
    async fn stop(&self) -> Result<()>;

    /// Last committed offset for a partition of a topic, if any.
    fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64>;
}

/// Builds a [`LogSource`] wired to the given assignment handler.
///
/// The generator owns the handler (its partition tracker) and defers source
/// construction until startup, after the ring subsystem is healthy.
pub trait SourceFactory: Send + Sync {
    fn create(&self, handler: Arc<dyn AssignmentHandler>) -> Result<Arc<dyn LogSource>>;
}

/// Committed-offset lookups for one topic.
///
/// Opened only after the startup handshake succeeded, like the other
/// auxiliary clients hanging off the streaming connection.
pub struct OffsetClient {
    source: Arc<dyn LogSource>,
    topic: String,
}

impl OffsetClient {
    pub fn new(source: Arc<dyn LogSource>, topic: impl Into<String>) -> Self {
        Self {
            source,
            topic: topic.into(),
        }
    }

    /// Last committed offset for a partition, if any.
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.source.committed_offset(&self.topic, partition)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackSource;

    #[tokio::test]
    async fn test_offset_client_reads_source_commits() {
        let source = Arc::new(LoopbackSource::new("spans"));
        source.commit("spans", 0, 41);

        let offsets = OffsetClient::new(source, "spans");
        assert_eq!(offsets.committed(0), Some(41));
        assert_eq!(offsets.committed(1), None);
        assert_eq!(offsets.topic(), "spans");
    }
}
