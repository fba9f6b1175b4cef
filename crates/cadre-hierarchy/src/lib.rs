//! Cadre Hierarchy - bounded-depth leader forest management
//!
//! Maintains a forest of leader trees (one per coordinator, at most
//! `MAX_LEVEL` levels deep) on top of a transactional store adapter:
//! - Mutation protocol: add subordinate, remove, move subtree, promote
//! - Read-only traversal: materialized trees, root paths, subordinate counts
//! - Invariant validation after every mutation and for whole-forest audits
//! - Per-tree locking and deadlines around each store transaction
//!
//! The engine keeps no state between calls; the store is the single source
//! of truth.

pub mod invariants;
pub mod locks;
pub mod manager;
pub mod mutation;
pub mod query;
pub mod transaction;
pub mod tree;

pub use invariants::{Violation, ViolationKind};
pub use locks::TreeLocks;
pub use manager::{HierarchyConfig, HierarchyManager};
pub use transaction::with_transaction;
pub use tree::{LeaderTree, TreeStats};

use cadre_protocol::LeaderId;
use cadre_state::StoreError;
use thiserror::Error;

/// Errors originating from the hierarchy layer.
#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Leader not found: {0}")]
    NotFound(LeaderId),

    #[error("Hierarchy depth exceeded maximum of {max}: {leader} would reach level {attempted}")]
    DepthLimitExceeded {
        leader: LeaderId,
        attempted: u32,
        max: u32,
    },

    #[error("Cannot move {node} under {target}: target is the node itself or one of its descendants")]
    CyclicMove { node: LeaderId, target: LeaderId },

    #[error("Leader {0} already has a parent")]
    AlreadyAttached(LeaderId),

    #[error("Leader {0} is already a coordinator")]
    AlreadyCoordinator(LeaderId),

    #[error("Leader {0} is not part of any tree")]
    Detached(LeaderId),

    #[error("Leader {0} is inactive")]
    Inactive(LeaderId),

    #[error("Hierarchy consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Operation deadline exceeded: {0}")]
    DeadlineExceeded(&'static str),

    #[error("Could not lock the trees touched by {operation} after {attempts} attempts")]
    LockContention {
        operation: &'static str,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HierarchyError {
    /// Whether the error signals a corrupted forest rather than a rejected
    /// request. Fatal errors need an operator, never a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HierarchyError::ConsistencyViolation(_))
    }
}
