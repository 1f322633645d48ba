//! Single-process simulation of a small voting cluster
//!
//! This library models a handful of logical nodes that elect a leader, order
//! vote events with a Lamport clock, and replicate accepted votes to every live
//! replica. All of it runs over one cluster-state record kept in a pluggable
//! [`StateStore`].
//!
//! # Features
//!
//! - Deterministic leader election (highest live node id wins)
//! - Lamport clock ticked once per received vote
//! - Round-robin load balancer decision, reported but never dispatched
//! - Idempotent vote replication with duplicate-voter detection
//! - Optimistic concurrency: compare-and-swap writes with bounded retries
//! - A human-readable trace of every step, tagged by subsystem
//!
//! # Example
//!
//! ```no_run
//! use votesim_cluster::{ClusterConfig, ClusterService, MemoryStateStore, VotingCoordinator};
//! use std::sync::Arc;
//!
//! # async fn example() -> votesim_cluster::Result<()> {
//! let store = Arc::new(MemoryStateStore::new());
//! let service = ClusterService::spawn(VotingCoordinator::new(store, ClusterConfig::default()));
//!
//! service.initialize().await?;
//! service.add_candidate("Alice").await?;
//!
//! let response = service.vote("v1", "Alice").await?;
//! for line in response.trace.lines() {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

mod balancer;
mod config;
mod coordinator;
mod election;
mod replication;
mod service;
mod state;
mod store;
mod trace;
mod types;

pub use balancer::select_target;
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use coordinator::{Failure, Outcome, Rejection, Response, VotingCoordinator};
pub use election::{current_leader, elect, NoQuorum};
pub use replication::{apply_vote, register_candidate, DuplicateCandidate};
pub use service::ClusterService;
pub use state::{Candidate, ClusterState, Node, Nodes};
pub use store::{MemoryStateStore, StateStore, StoreError, StoreResult, Versioned};
pub use trace::{Tag, Trace, TraceEvent};
pub use types::{LamportClock, NodeId, NodeStatus, ParseNodeIdError};

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that abort a request before anything is persisted
///
/// Rejected and failed votes are not errors; they are reported through
/// [`Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("System not initialized")]
    Uninitialized,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Stored cluster state is corrupt: {0}")]
    CorruptState(String),

    #[error("Gave up after {attempts} conflicting write attempts")]
    Contention { attempts: u32 },

    #[error("Cluster service is shutting down")]
    ShuttingDown,

    #[error("Cluster service task failed: {0}")]
    ServiceFailed(String),
}

impl From<StoreError> for ClusterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(reason) => ClusterError::StorageUnavailable(reason),
            StoreError::Corrupt(reason) => ClusterError::CorruptState(reason),
            StoreError::Conflict { .. } => ClusterError::Contention { attempts: 1 },
        }
    }
}
