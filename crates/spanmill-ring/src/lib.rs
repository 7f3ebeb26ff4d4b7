//! Spanmill Ring - Token-Ring Membership
//!
//! This crate implements hash-ring membership for spanmill replicas. Each
//! replica registers a set of ownership tokens in a shared ring, heartbeats
//! to advertise liveness, and deregisters on graceful shutdown.
//!
//! ## Components
//!
//! - **RingState / ReplicaDesc**: the shared ring snapshot
//! - **MembershipStore**: pluggable backend holding the ring (in-memory in-tree)
//! - **LifecyclerDelegate**: the capability set a replica plugs into the ring
//! - **Lifecycler**: register + heartbeat + deregister driver
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spanmill_ring::{Lifecycler, LifecyclerConfig, MemoryMembershipStore};
//! # use spanmill_ring::{LifecyclerDelegate, ReplicaDesc, ReplicaState, RingState};
//! # struct MyDelegate;
//! # impl LifecyclerDelegate for MyDelegate {
//! #     fn on_register(&self, _: &RingState, _: Option<&ReplicaDesc>) -> (ReplicaState, Vec<u32>) {
//! #         (ReplicaState::Active, vec![1])
//! #     }
//! #     fn on_tokens_observed(&self, _: &[u32]) {}
//! #     fn on_stopping(&self, _: &str, _: &mut RingState) {}
//! #     fn on_heartbeat(&self, _: &str, _: &mut RingState) {}
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryMembershipStore::new());
//! let lifecycler = Lifecycler::new(
//!     LifecyclerConfig::new("replica-1", "10.0.1.5:9090"),
//!     store,
//!     Arc::new(MyDelegate),
//!     None,
//! );
//!
//! lifecycler.start().await?;
//! assert!(lifecycler.is_registered());
//! lifecycler.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod delegate;
pub mod error;
pub mod lifecycler;
pub mod state;
pub mod store;
pub mod tokens;

pub use delegate::{AutoForgetDelegate, LeaveOnStoppingDelegate, LifecyclerDelegate};
pub use error::{Result, RingError};
pub use lifecycler::{Lifecycler, LifecyclerConfig};
pub use state::{ReplicaDesc, ReplicaState, RingState};
pub use store::{MembershipStore, MemoryMembershipStore, RingMutation};
pub use tokens::TokenGenerator;
