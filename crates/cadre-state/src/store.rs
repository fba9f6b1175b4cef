//! Store adapter contract.
//!
//! The hierarchy engine holds no state between calls. Every operation opens
//! a transaction on the store, reads the tree shape it needs, validates, and
//! writes back. Backends implement two traits:
//! - `HierarchyStore` hands out transactions
//! - `StoreTransaction` is the scoped read/write context
//!
//! A transaction that is dropped without `commit` must leave no trace. This
//! is what makes deadline cancellation safe: the engine simply drops the
//! in-flight future.

use async_trait::async_trait;

use cadre_protocol::{LeaderId, LeaderNode};

use crate::StoreError;

/// Source of transactional contexts over the leader records.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Whether `rollback` really undoes writes.
    ///
    /// Stores that answer `false` apply writes immediately; the engine then
    /// re-validates affected trees after every commit.
    fn is_transactional(&self) -> bool {
        true
    }
}

/// A scoped read/write context.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Fetch a single record, `None` if the id is unknown.
    async fn get_node(&mut self, id: &LeaderId) -> Result<Option<LeaderNode>, StoreError>;

    /// Direct children of `id` (records whose `parent_id == id`).
    async fn get_children(
        &mut self,
        id: &LeaderId,
        include_inactive: bool,
    ) -> Result<Vec<LeaderNode>, StoreError>;

    /// Upsert. For an existing record only `parent_id`, `level`,
    /// `is_coordinator` and `updated_at` are taken from `node`.
    async fn write_node(&mut self, node: &LeaderNode) -> Result<(), StoreError>;

    /// Every record in the store, for audits.
    async fn all_nodes(&mut self) -> Result<Vec<LeaderNode>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
