//! Leader hierarchy manager: the entry point for every hierarchy operation.
//!
//! The manager holds no forest state of its own. Each call opens a store
//! transaction, reads the shape it needs, validates and writes back.
//!
//! Mutation protocol:
//! 1. Resolve the roots of every tree the mutation names
//! 2. Lock those trees (sorted order)
//! 3. Begin a transaction and re-resolve the roots; retry from 1 if they
//!    moved in the meantime
//! 4. Apply, re-check the touched records, commit
//! 5. Optionally re-validate the affected trees after commit
//!
//! Steps 1-4 run under the operation deadline. On expiry the in-flight
//! future is dropped, which drops the uncommitted transaction. Step 5 runs
//! to completion once the commit has happened.
//!
//! A store that cannot roll back is only checked against the deadline
//! before its transaction begins. Its apply phase is never cancelled, and
//! if it fails part way the affected trees are re-validated.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use cadre_protocol::{
    LeaderId, LeaderNode, MoveOutcome, PromotionOutcome, RemovalOutcome,
    DEFAULT_LOCK_RETRIES, DEFAULT_OPERATION_TIMEOUT_MS, MAX_LEVEL,
};
use cadre_state::{HierarchyStore, StoreTransaction};

use crate::invariants::{self, Violation};
use crate::locks::TreeLocks;
use crate::mutation::{
    AddSubordinate, Applied, MoveSubtree, Mutation, PromoteToCoordinator, RegisterLeader,
    RemoveFromHierarchy,
};
use crate::query;
use crate::transaction::with_transaction;
use crate::tree::{LeaderTree, TreeStats};
use crate::HierarchyError;

/// Configuration for the hierarchy manager.
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    /// Deepest level a leader may occupy. Values above `MAX_LEVEL` are
    /// clamped down to it.
    pub max_level: u32,
    /// Upper bound on a single operation, `None` for no limit.
    pub operation_timeout: Option<Duration>,
    /// How many times a mutation re-resolves its tree locks before giving up.
    pub lock_retries: u32,
    /// Re-read and re-validate the affected trees after every commit.
    /// Always done for non-transactional stores.
    pub verify_after_commit: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_level: MAX_LEVEL,
            operation_timeout: Some(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)),
            lock_retries: DEFAULT_LOCK_RETRIES,
            verify_after_commit: false,
        }
    }
}

impl HierarchyConfig {
    pub fn effective_max_level(&self) -> u32 {
        self.max_level.clamp(1, MAX_LEVEL)
    }
}

enum Attempt<T> {
    Done(Applied<T>),
    /// The locked trees changed between resolution and the transaction.
    Retry,
}

/// Applies the mutation protocol and answers tree queries against a store.
///
/// Cheap to clone; clones share the store and the tree lock table.
#[derive(Clone)]
pub struct HierarchyManager {
    store: Arc<dyn HierarchyStore>,
    locks: Arc<TreeLocks>,
    config: HierarchyConfig,
    deadline: Option<Instant>,
}

impl HierarchyManager {
    pub fn new(store: Arc<dyn HierarchyStore>, config: HierarchyConfig) -> Self {
        Self {
            store,
            locks: Arc::new(TreeLocks::new()),
            config,
            deadline: None,
        }
    }

    /// A handle whose operations must finish before `deadline`, on top of
    /// the configured per-operation timeout.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn HierarchyStore> {
        &self.store
    }

    fn max_level(&self) -> u32 {
        self.config.effective_max_level()
    }

    // ═══════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════

    /// Attach the detached leader `leader_id` under `parent_id`.
    pub async fn add_subordinate(
        &self,
        parent_id: &LeaderId,
        leader_id: &LeaderId,
    ) -> Result<LeaderNode, HierarchyError> {
        self.execute(AddSubordinate {
            parent_id: parent_id.clone(),
            leader_id: leader_id.clone(),
        })
        .await
    }

    /// Detach `node_id`, handing its children to its former parent (or
    /// turning them into coordinators if it was a root).
    pub async fn remove_from_hierarchy(
        &self,
        node_id: &LeaderId,
    ) -> Result<RemovalOutcome, HierarchyError> {
        self.execute(RemoveFromHierarchy {
            node_id: node_id.clone(),
        })
        .await
    }

    /// Re-parent `node_id` and its whole subtree under `new_parent_id`.
    pub async fn move_subtree(
        &self,
        node_id: &LeaderId,
        new_parent_id: &LeaderId,
    ) -> Result<MoveOutcome, HierarchyError> {
        self.execute(MoveSubtree {
            node_id: node_id.clone(),
            new_parent_id: new_parent_id.clone(),
        })
        .await
    }

    /// Make `node_id` the coordinator of its own tree.
    pub async fn promote_to_coordinator(
        &self,
        node_id: &LeaderId,
    ) -> Result<PromotionOutcome, HierarchyError> {
        self.execute(PromoteToCoordinator {
            node_id: node_id.clone(),
        })
        .await
    }

    /// Create a fresh detached or coordinator record.
    pub async fn register_leader(&self, node: LeaderNode) -> Result<LeaderNode, HierarchyError> {
        self.execute(RegisterLeader { node }).await
    }

    async fn execute<M: Mutation>(&self, op: M) -> Result<M::Output, HierarchyError> {
        let result = self.run_locked(op, self.deadline()).await;
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::error!(operation = M::NAME, error = %err, "Hierarchy consistency violation");
            } else {
                tracing::debug!(operation = M::NAME, error = %err, "Hierarchy mutation rejected");
            }
        }
        result
    }

    async fn run_locked<M: Mutation>(
        &self,
        op: M,
        deadline: Option<Instant>,
    ) -> Result<M::Output, HierarchyError> {
        let max_level = self.max_level();
        let seeds = op.lock_seeds();
        let attempts = self.config.lock_retries.max(1);
        let transactional = self.store.is_transactional();

        for attempt in 1..=attempts {
            let keys = within(deadline, M::NAME, self.resolve_lock_keys(seeds.clone())).await?;
            let _guard = within(deadline, M::NAME, async {
                Ok(self.locks.acquire(keys.iter().cloned()).await)
            })
            .await?;

            let expected = keys.clone();
            let seeds_in_tx = seeds.clone();
            let op_in_tx = op.clone();
            let transaction = with_transaction(self.store.as_ref(), move |tx| {
                Box::pin(async move {
                    let current = query::lock_keys(tx, &seeds_in_tx, max_level).await?;
                    if current != expected {
                        return Ok(Attempt::Retry);
                    }
                    let applied = op_in_tx.apply(tx, max_level).await?;
                    invariants::check_touched(tx, &applied.touched, max_level).await?;
                    Ok(Attempt::Done(applied))
                })
            });

            let outcome = if transactional {
                within(deadline, M::NAME, transaction).await?
            } else {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    return Err(deadline_exceeded(M::NAME));
                }
                match transaction.await {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        // Writes made before the failure are already visible.
                        let mut affected: Vec<LeaderId> = keys.iter().cloned().collect();
                        affected.extend(seeds.iter().cloned());
                        self.verify_trees(affected).await?;
                        return Err(err);
                    }
                }
            };

            match outcome {
                Attempt::Done(applied) => {
                    if self.config.verify_after_commit || !transactional {
                        self.verify_trees(applied.touched.clone()).await?;
                    }
                    tracing::info!(
                        operation = M::NAME,
                        touched = applied.touched.len(),
                        trees = keys.len(),
                        "Hierarchy mutation committed"
                    );
                    return Ok(applied.output);
                }
                Attempt::Retry => {
                    tracing::debug!(
                        operation = M::NAME,
                        attempt,
                        "Tree roots changed while locking, retrying"
                    );
                }
            }
        }

        tracing::warn!(operation = M::NAME, attempts, "Giving up on tree locks");
        Err(HierarchyError::LockContention {
            operation: M::NAME,
            attempts,
        })
    }

    async fn resolve_lock_keys(
        &self,
        seeds: Vec<LeaderId>,
    ) -> Result<BTreeSet<LeaderId>, HierarchyError> {
        let max_level = self.max_level();
        self.read(move |tx| {
            Box::pin(async move { query::lock_keys(tx, &seeds, max_level).await })
        })
        .await
    }

    /// Re-validate every tree containing one of `touched`, as committed.
    async fn verify_trees(&self, touched: Vec<LeaderId>) -> Result<(), HierarchyError> {
        let max_level = self.max_level();
        let violations = self
            .read(move |tx| {
                Box::pin(async move {
                    let roots = query::lock_keys(tx, &touched, max_level).await?;
                    let mut nodes = Vec::new();
                    for root in roots {
                        let Some(node) = tx.get_node(&root).await? else {
                            continue;
                        };
                        let below = query::descendants(tx, &root, true, max_level).await?;
                        nodes.push(node);
                        nodes.extend(below.into_iter().map(|(node, _)| node));
                    }
                    Ok(invariants::validate_forest(&nodes, max_level))
                })
            })
            .await?;

        if violations.is_empty() {
            return Ok(());
        }
        Err(HierarchyError::ConsistencyViolation(invariants::summarize(
            &violations,
        )))
    }

    // ═══════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════

    pub async fn get_node(&self, id: &LeaderId) -> Result<LeaderNode, HierarchyError> {
        let id = id.clone();
        self.bounded(
            "get_node",
            self.read(move |tx| Box::pin(async move { query::load(tx, &id).await })),
        )
        .await
    }

    /// Materialize the tree rooted at `root_id`. Inactive leaders (and
    /// everything below them) are left out unless `include_inactive`.
    pub async fn get_tree(
        &self,
        root_id: &LeaderId,
        include_inactive: bool,
    ) -> Result<LeaderTree, HierarchyError> {
        let root_id = root_id.clone();
        let max_level = self.max_level();
        self.bounded(
            "get_tree",
            self.read(move |tx| {
                Box::pin(async move {
                    query::materialize(tx, &root_id, include_inactive, max_level).await
                })
            }),
        )
        .await
    }

    /// Path from the tree's coordinator down to `id`, both included.
    pub async fn get_hierarchy_path(
        &self,
        id: &LeaderId,
    ) -> Result<Vec<LeaderNode>, HierarchyError> {
        let id = id.clone();
        let max_level = self.max_level();
        self.bounded(
            "get_hierarchy_path",
            self.read(move |tx| {
                Box::pin(async move { query::hierarchy_path(tx, &id, max_level).await })
            }),
        )
        .await
    }

    /// Number of active descendants of `id`, at any depth.
    pub async fn count_subordinates(&self, id: &LeaderId) -> Result<usize, HierarchyError> {
        let id = id.clone();
        let max_level = self.max_level();
        self.bounded(
            "count_subordinates",
            self.read(move |tx| {
                Box::pin(async move {
                    query::load(tx, &id).await?;
                    Ok(query::descendants(tx, &id, false, max_level).await?.len())
                })
            }),
        )
        .await
    }

    /// Ids on the path from `root_id` down to `target_id` in the active
    /// tree, or `None` if the target is not in it.
    pub async fn find_path_to_node(
        &self,
        root_id: &LeaderId,
        target_id: &LeaderId,
    ) -> Result<Option<HashSet<LeaderId>>, HierarchyError> {
        let tree = self.get_tree(root_id, false).await?;
        Ok(tree.find_path_to_node(target_id))
    }

    /// Summary of the whole tree rooted at `root_id`, inactive leaders
    /// included.
    pub async fn tree_stats(&self, root_id: &LeaderId) -> Result<TreeStats, HierarchyError> {
        let tree = self.get_tree(root_id, true).await?;
        Ok(TreeStats::from_tree(&tree, self.max_level()))
    }

    /// Check every record in the store. An empty list means the forest is
    /// consistent.
    pub async fn audit(&self) -> Result<Vec<Violation>, HierarchyError> {
        let max_level = self.max_level();
        let violations = self
            .bounded(
                "audit",
                self.read(move |tx| {
                    Box::pin(async move {
                        let nodes = tx.all_nodes().await?;
                        Ok(invariants::validate_forest(&nodes, max_level))
                    })
                }),
            )
            .await?;

        if !violations.is_empty() {
            tracing::error!(
                violations = violations.len(),
                first = %violations[0],
                "Forest audit found invariant violations"
            );
        }
        Ok(violations)
    }

    // ═══════════════════════════════════════════════════════════════
    // Plumbing
    // ═══════════════════════════════════════════════════════════════

    /// Run a read-only operation in its own transaction, then roll it back.
    async fn read<T, F>(&self, op: F) -> Result<T, HierarchyError>
    where
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, Result<T, HierarchyError>>,
    {
        let mut tx = self.store.begin().await?;
        let result = op(tx.as_mut()).await;
        if let Err(err) = tx.rollback().await {
            tracing::debug!(error = %err, "Rollback of read transaction failed");
        }
        result
    }

    /// The instant the current operation must finish by, if any.
    fn deadline(&self) -> Option<Instant> {
        let timeout = self
            .config
            .operation_timeout
            .map(|timeout| Instant::now() + timeout);
        match (timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, HierarchyError>
    where
        F: Future<Output = Result<T, HierarchyError>>,
    {
        within(self.deadline(), operation, fut).await
    }
}

async fn within<T, F>(
    deadline: Option<Instant>,
    operation: &'static str,
    fut: F,
) -> Result<T, HierarchyError>
where
    F: Future<Output = Result<T, HierarchyError>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(deadline_exceeded(operation)),
    }
}

fn deadline_exceeded(operation: &'static str) -> HierarchyError {
    tracing::warn!(operation, "Hierarchy operation deadline exceeded");
    HierarchyError::DeadlineExceeded(operation)
}
