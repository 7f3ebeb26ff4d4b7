//! Membership store - shared ring state backend.
//!
//! The ring lives in a store shared by all replicas. The store's single
//! requirement is an atomic read-modify-write so that concurrent
//! registrations never clobber each other's tokens.
//!
//! The in-tree backend is in-memory and shared by handle; a distributed KV
//! backend implements the same trait.

use crate::error::Result;
use crate::state::RingState;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Closure applied to the ring under the store's exclusive section.
pub type RingMutation = Box<dyn FnOnce(&mut RingState) + Send>;

/// Backend holding the shared ring state.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Atomically read-modify-write the ring. Returns the state after the
    /// mutation was applied.
    async fn update(&self, mutate: RingMutation) -> Result<RingState>;

    /// Current ring snapshot.
    async fn get(&self) -> Result<RingState>;
}

/// In-memory membership store.
///
/// Shared across replicas by cloning the `Arc` handle. Suitable for
/// single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryMembershipStore {
    state: Mutex<RingState>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn update(&self, mutate: RingMutation) -> Result<RingState> {
        let mut state = self.state.lock().await;
        mutate(&mut state);
        Ok(state.clone())
    }

    async fn get(&self) -> Result<RingState> {
        Ok(self.state.lock().await.clone())
    }
}
