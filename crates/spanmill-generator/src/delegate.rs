//! The generator's ring delegate.
//!
//! When this replica registers in the ring it starts from a clean situation:
//! whatever the previous state was, it returns Active while keeping any
//! tokens it already owned and generating only the missing ones. There is no
//! joining/pending state because this tier has no data to replay before
//! serving.

use spanmill_ring::{LifecyclerDelegate, ReplicaDesc, ReplicaState, RingState, TokenGenerator};

/// Tokens per replica. A safe default rather than a config option, to keep
/// the configuration surface small.
pub const RING_TOKEN_COUNT: usize = 256;

/// Consecutive heartbeat-timeout periods after which an unhealthy replica is
/// removed from the ring automatically.
pub const RING_AUTO_FORGET_UNHEALTHY_PERIODS: u32 = 2;

pub struct GeneratorDelegate;

impl LifecyclerDelegate for GeneratorDelegate {
    fn on_register(
        &self,
        ring: &RingState,
        existing: Option<&ReplicaDesc>,
    ) -> (ReplicaState, Vec<u32>) {
        let mut tokens = existing.map(|desc| desc.tokens.clone()).unwrap_or_default();

        let taken = ring.taken_tokens();
        let missing = RING_TOKEN_COUNT.saturating_sub(tokens.len());
        tokens.extend(TokenGenerator::new().generate(missing, &taken));

        // Token sorting is enforced by the lifecycler.
        (ReplicaState::Active, tokens)
    }

    fn on_tokens_observed(&self, _tokens: &[u32]) {}

    fn on_stopping(&self, _replica_id: &str, _ring: &mut RingState) {}

    fn on_heartbeat(&self, _replica_id: &str, _ring: &mut RingState) {}
}
