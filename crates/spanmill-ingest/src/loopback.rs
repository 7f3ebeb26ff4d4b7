//! In-process log-stream source.
//!
//! A `LoopbackSource` stands in for a real consumer-group client in
//! single-binary deployments and tests. It keeps per-partition progress in
//! memory, delivers assign/revoke callbacks serially, and honors the source
//! contract: in-flight offsets are committed before a revoke callback fires
//! and before `stop` returns.
//!
//! Ping fault injection (`fail_next_pings`) exercises the startup handshake.

use crate::assignment::PartitionAssignment;
use crate::error::{IngestError, Result};
use crate::source::{AssignmentHandler, LogSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

pub struct LoopbackSource {
    topic: String,
    handler: RwLock<Option<Arc<dyn AssignmentHandler>>>,

    /// Offsets committed to the group.
    committed: RwLock<HashMap<(String, i32), i64>>,

    /// In-flight progress, not yet committed.
    in_flight: RwLock<HashMap<(String, i32), i64>>,

    /// Serializes assign/revoke delivery.
    callback_gate: Mutex<()>,

    ping_failures: AtomicUsize,
    stopped: AtomicBool,
}

impl LoopbackSource {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            handler: RwLock::new(None),
            committed: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashMap::new()),
            callback_gate: Mutex::new(()),
            ping_failures: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_handler(topic: impl Into<String>, handler: Arc<dyn AssignmentHandler>) -> Self {
        let source = Self::new(topic);
        *source.handler.write().expect("handler lock poisoned") = Some(handler);
        source
    }

    pub fn set_handler(&self, handler: Arc<dyn AssignmentHandler>) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    /// Make the next `n` pings fail.
    pub fn fail_next_pings(&self, n: usize) {
        self.ping_failures.store(n, Ordering::Release);
    }

    /// Record in-flight progress on a partition.
    pub fn observe(&self, partition: i32, offset: i64) {
        self.in_flight
            .write()
            .expect("in-flight lock poisoned")
            .insert((self.topic.clone(), partition), offset);
    }

    /// Commit an offset directly.
    pub fn commit(&self, topic: &str, partition: i32, offset: i64) {
        self.committed
            .write()
            .expect("committed lock poisoned")
            .insert((topic.to_string(), partition), offset);
    }

    /// Deliver an assignment to the handler.
    pub fn assign(&self, partitions: &[i32]) {
        let _gate = self.callback_gate.lock().expect("callback gate poisoned");
        let assignment = self.assignment_for(partitions);
        if let Some(handler) = self.handler.read().expect("handler lock poisoned").as_ref() {
            handler.on_assigned(&assignment);
        }
    }

    /// Revoke partitions: commit their in-flight offsets, then notify the
    /// handler.
    pub fn revoke(&self, partitions: &[i32]) {
        let _gate = self.callback_gate.lock().expect("callback gate poisoned");
        for partition in partitions {
            self.commit_in_flight(*partition);
        }

        let assignment = self.assignment_for(partitions);
        if let Some(handler) = self.handler.read().expect("handler lock poisoned").as_ref() {
            handler.on_revoked(&assignment);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn assignment_for(&self, partitions: &[i32]) -> PartitionAssignment {
        let mut assignment = PartitionAssignment::new();
        assignment.insert(self.topic.clone(), partitions.to_vec());
        assignment
    }

    fn commit_in_flight(&self, partition: i32) {
        let key = (self.topic.clone(), partition);
        if let Some(offset) = self
            .in_flight
            .write()
            .expect("in-flight lock poisoned")
            .remove(&key)
        {
            debug!(
                topic = %key.0,
                partition,
                offset,
                "Committing in-flight offset"
            );
            self.committed
                .write()
                .expect("committed lock poisoned")
                .insert(key, offset);
        }
    }
}

#[async_trait]
impl LogSource for LoopbackSource {
    async fn ping(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(IngestError::SourceStopped);
        }

        let mut remaining = self.ping_failures.load(Ordering::Acquire);
        while remaining > 0 {
            match self.ping_failures.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Err(IngestError::Unavailable("injected ping failure".into())),
                Err(actual) => remaining = actual,
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let partitions: Vec<i32> = self
            .in_flight
            .read()
            .expect("in-flight lock poisoned")
            .keys()
            .map(|(_, partition)| *partition)
            .collect();
        for partition in partitions {
            self.commit_in_flight(partition);
        }

        self.stopped.store(true, Ordering::Release);
        Ok(())
    }

    fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.committed
            .read()
            .expect("committed lock poisoned")
            .get(&(topic.to_string(), partition))
            .copied()
    }
}
