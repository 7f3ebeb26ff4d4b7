//! Lifecycler delegate - the capability set a replica plugs into the ring.
//!
//! The lifecycler is generic over what a replica does at each membership
//! event; the delegate supplies that behavior. Delegates compose: decorators
//! wrap an inner delegate and add one concern each, outermost decorator
//! invoked first.

use crate::state::{current_timestamp_ms, ReplicaDesc, ReplicaState, RingState};
use std::time::Duration;
use tracing::{info, warn};

/// Callbacks the lifecycler invokes on membership events.
pub trait LifecyclerDelegate: Send + Sync {
    /// Called while registering, under the store's exclusive section.
    ///
    /// `existing` is this replica's previous descriptor when re-registering.
    /// Returns the state and token set to claim; sorting is enforced by the
    /// lifecycler.
    fn on_register(
        &self,
        ring: &RingState,
        existing: Option<&ReplicaDesc>,
    ) -> (ReplicaState, Vec<u32>);

    /// Observed the final token set after registration completed.
    fn on_tokens_observed(&self, tokens: &[u32]);

    /// The lifecycler is about to deregister; may update the ring one last
    /// time (still under the store's exclusive section).
    fn on_stopping(&self, replica_id: &str, ring: &mut RingState);

    /// Periodic heartbeat; may prune or adjust the ring.
    fn on_heartbeat(&self, replica_id: &str, ring: &mut RingState);
}

/// Decorator that purges replicas whose heartbeat is older than the forget
/// period, so crashed peers do not linger in the ring forever.
pub struct AutoForgetDelegate<D> {
    forget_period: Duration,
    next: D,
}

impl<D: LifecyclerDelegate> AutoForgetDelegate<D> {
    pub fn new(forget_period: Duration, next: D) -> Self {
        Self {
            forget_period,
            next,
        }
    }
}

impl<D: LifecyclerDelegate> LifecyclerDelegate for AutoForgetDelegate<D> {
    fn on_register(
        &self,
        ring: &RingState,
        existing: Option<&ReplicaDesc>,
    ) -> (ReplicaState, Vec<u32>) {
        self.next.on_register(ring, existing)
    }

    fn on_tokens_observed(&self, tokens: &[u32]) {
        self.next.on_tokens_observed(tokens)
    }

    fn on_stopping(&self, replica_id: &str, ring: &mut RingState) {
        self.next.on_stopping(replica_id, ring)
    }

    fn on_heartbeat(&self, replica_id: &str, ring: &mut RingState) {
        let deadline = current_timestamp_ms() - self.forget_period.as_millis() as i64;

        let stale: Vec<String> = ring
            .replicas
            .iter()
            .filter(|(id, desc)| id.as_str() != replica_id && desc.heartbeat_ms < deadline)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stale {
            warn!(
                replica_id = %id,
                forget_period_secs = self.forget_period.as_secs(),
                "Removing unhealthy replica from the ring"
            );
            ring.replicas.remove(&id);
        }

        self.next.on_heartbeat(replica_id, ring)
    }
}

/// Decorator that marks the replica as leaving before deregistration, so
/// peers observe an orderly departure instead of a vanished member.
pub struct LeaveOnStoppingDelegate<D> {
    next: D,
}

impl<D: LifecyclerDelegate> LeaveOnStoppingDelegate<D> {
    pub fn new(next: D) -> Self {
        Self { next }
    }
}

impl<D: LifecyclerDelegate> LifecyclerDelegate for LeaveOnStoppingDelegate<D> {
    fn on_register(
        &self,
        ring: &RingState,
        existing: Option<&ReplicaDesc>,
    ) -> (ReplicaState, Vec<u32>) {
        self.next.on_register(ring, existing)
    }

    fn on_tokens_observed(&self, tokens: &[u32]) {
        self.next.on_tokens_observed(tokens)
    }

    fn on_stopping(&self, replica_id: &str, ring: &mut RingState) {
        if let Some(desc) = ring.replicas.get_mut(replica_id) {
            info!(replica_id = %replica_id, "Marking replica as leaving");
            desc.state = ReplicaState::Leaving;
        }
        self.next.on_stopping(replica_id, ring)
    }

    fn on_heartbeat(&self, replica_id: &str, ring: &mut RingState) {
        self.next.on_heartbeat(replica_id, ring)
    }
}
