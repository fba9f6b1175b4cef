//! Cadre State - the authoritative leader records and how to reach them
//!
//! Provides the storage side of the hierarchy engine:
//! - The store adapter contract (`HierarchyStore`, `StoreTransaction`)
//!   every backend must satisfy
//! - A transactional in-memory store used by the server and as the
//!   mock adapter in tests
//! - JSON forest snapshots for persisting the in-memory store

pub mod memory_store;
pub mod snapshot;
pub mod store;

pub use memory_store::InMemoryStore;
pub use snapshot::ForestSnapshot;
pub use store::{HierarchyStore, StoreTransaction};

use cadre_protocol::LeaderId;
use thiserror::Error;

/// Errors originating from the state layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Leader already exists: {0}")]
    DuplicateId(LeaderId),

    #[error("Leader not found: {0}")]
    NotFound(LeaderId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported snapshot version {got}, expected {expected}")]
    UnsupportedSnapshotVersion { expected: u32, got: u32 },
}
