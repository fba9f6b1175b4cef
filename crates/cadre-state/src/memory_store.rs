//! Transactional in-memory leader store.
//!
//! All records live behind a single async mutex. `begin` takes an owned
//! guard on it, so transactions run one at a time and never observe each
//! other's partial writes. Writes are staged in an overlay and only folded
//! into the forest on `commit`; rollback (explicit or by drop) discards the
//! overlay.
//!
//! A parent -> children index is kept next to the records so `get_children`
//! does not scan the whole forest.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cadre_protocol::{LeaderId, LeaderNode};

use crate::snapshot::ForestSnapshot;
use crate::store::{HierarchyStore, StoreTransaction};
use crate::StoreError;

#[derive(Debug, Default)]
struct Forest {
    nodes: HashMap<LeaderId, LeaderNode>,
    children: HashMap<LeaderId, BTreeSet<LeaderId>>,
}

impl Forest {
    fn from_nodes(nodes: Vec<LeaderNode>) -> Result<Self, StoreError> {
        let mut forest = Forest::default();
        for node in nodes {
            if forest.nodes.contains_key(&node.id) {
                return Err(StoreError::DuplicateId(node.id));
            }
            forest.upsert(node);
        }
        Ok(forest)
    }

    /// Insert or replace a record, keeping the children index in step.
    fn upsert(&mut self, node: LeaderNode) {
        let previous_parent = self
            .nodes
            .get(&node.id)
            .and_then(|existing| existing.parent_id.clone());

        if previous_parent != node.parent_id {
            if let Some(old) = previous_parent {
                if let Some(siblings) = self.children.get_mut(&old) {
                    siblings.remove(&node.id);
                    if siblings.is_empty() {
                        self.children.remove(&old);
                    }
                }
            }
        }
        if let Some(parent) = &node.parent_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(node.id.clone());
        }

        self.nodes.insert(node.id.clone(), node);
    }

    fn sorted_nodes(&self) -> Vec<LeaderNode> {
        let mut nodes: Vec<LeaderNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

/// Apply the hierarchy-owned fields of `incoming` onto the stored record.
fn merge_mutable(existing: Option<&LeaderNode>, incoming: &LeaderNode) -> LeaderNode {
    match existing {
        Some(existing) => {
            let mut merged = existing.clone();
            merged.parent_id = incoming.parent_id.clone();
            merged.level = incoming.level;
            merged.is_coordinator = incoming.is_coordinator;
            merged.updated_at = incoming.updated_at;
            merged
        }
        None => incoming.clone(),
    }
}

/// In-memory implementation of [`HierarchyStore`].
#[derive(Clone)]
pub struct InMemoryStore {
    forest: Arc<Mutex<Forest>>,
    transactional: bool,
    next_tx: Arc<AtomicU64>,
}

impl InMemoryStore {
    /// Create an empty transactional store.
    pub fn new() -> Self {
        Self {
            forest: Arc::new(Mutex::new(Forest::default())),
            transactional: true,
            next_tx: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create an empty store whose writes bypass the staging overlay.
    ///
    /// Rollback cannot undo anything; used to exercise the engine's
    /// post-commit verification path.
    pub fn non_transactional() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    /// Create a transactional store seeded with `nodes`.
    pub fn with_nodes(nodes: Vec<LeaderNode>) -> Result<Self, StoreError> {
        let forest = Forest::from_nodes(nodes)?;
        Ok(Self {
            forest: Arc::new(Mutex::new(forest)),
            ..Self::new()
        })
    }

    /// Create a store from a previously taken snapshot.
    pub fn from_snapshot(snapshot: ForestSnapshot) -> Result<Self, StoreError> {
        Self::with_nodes(snapshot.nodes)
    }

    /// Load a store from a snapshot file.
    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let snapshot = ForestSnapshot::load(path)?;
        tracing::info!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            "Loaded forest snapshot"
        );
        Self::from_snapshot(snapshot)
    }

    /// Register a brand-new record. Fails if the id is taken.
    pub async fn insert(&self, node: LeaderNode) -> Result<(), StoreError> {
        let mut forest = self.forest.lock().await;
        if forest.nodes.contains_key(&node.id) {
            return Err(StoreError::DuplicateId(node.id));
        }
        forest.upsert(node);
        Ok(())
    }

    pub async fn get(&self, id: &LeaderId) -> Option<LeaderNode> {
        self.forest.lock().await.nodes.get(id).cloned()
    }

    /// Flip the activity flag of a record and return the updated record.
    pub async fn set_active(&self, id: &LeaderId, active: bool) -> Result<LeaderNode, StoreError> {
        let mut forest = self.forest.lock().await;
        let node = forest
            .nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        node.is_active = active;
        node.touch();
        Ok(node.clone())
    }

    pub async fn len(&self) -> usize {
        self.forest.lock().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every committed record, ordered by id.
    pub async fn all_nodes(&self) -> Vec<LeaderNode> {
        self.forest.lock().await.sorted_nodes()
    }

    pub async fn snapshot(&self) -> ForestSnapshot {
        ForestSnapshot::new(self.all_nodes().await)
    }

    /// Write the committed forest to `path`.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| StoreError::Backend(format!("snapshot writer panicked: {}", e)))?
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HierarchyStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let forest = Arc::clone(&self.forest).lock_owned().await;
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx = id, "Transaction opened");
        Ok(Box::new(MemoryTransaction {
            id,
            forest,
            staged: HashMap::new(),
            transactional: self.transactional,
            applied: 0,
        }))
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}

/// Transaction handed out by [`InMemoryStore::begin`].
///
/// Holds the store lock for its whole lifetime.
pub struct MemoryTransaction {
    id: u64,
    forest: OwnedMutexGuard<Forest>,
    staged: HashMap<LeaderId, LeaderNode>,
    transactional: bool,
    /// Writes already applied in non-transactional mode.
    applied: usize,
}

impl MemoryTransaction {
    fn view(&self, id: &LeaderId) -> Option<&LeaderNode> {
        self.staged.get(id).or_else(|| self.forest.nodes.get(id))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_node(&mut self, id: &LeaderId) -> Result<Option<LeaderNode>, StoreError> {
        Ok(self.view(id).cloned())
    }

    async fn get_children(
        &mut self,
        id: &LeaderId,
        include_inactive: bool,
    ) -> Result<Vec<LeaderNode>, StoreError> {
        let mut candidates = self.forest.children.get(id).cloned().unwrap_or_default();
        for staged in self.staged.values() {
            if staged.parent_id.as_ref() == Some(id) {
                candidates.insert(staged.id.clone());
            }
        }

        // Staged writes may have moved committed children elsewhere.
        Ok(candidates
            .iter()
            .filter_map(|child_id| self.view(child_id))
            .filter(|child| child.parent_id.as_ref() == Some(id))
            .filter(|child| include_inactive || child.is_active)
            .cloned()
            .collect())
    }

    async fn write_node(&mut self, node: &LeaderNode) -> Result<(), StoreError> {
        let merged = merge_mutable(self.view(&node.id), node);
        if self.transactional {
            self.staged.insert(merged.id.clone(), merged);
        } else {
            self.forest.upsert(merged);
            self.applied += 1;
        }
        Ok(())
    }

    async fn all_nodes(&mut self) -> Result<Vec<LeaderNode>, StoreError> {
        let mut merged: HashMap<&LeaderId, &LeaderNode> = self.forest.nodes.iter().collect();
        for (id, node) in &self.staged {
            merged.insert(id, node);
        }
        let mut nodes: Vec<LeaderNode> = merged.into_values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            id,
            mut forest,
            staged,
            ..
        } = *self;
        let writes = staged.len();
        for (_, node) in staged {
            forest.upsert(node);
        }
        tracing::trace!(tx = id, writes, "Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        if self.transactional {
            tracing::trace!(tx = self.id, discarded = self.staged.len(), "Transaction rolled back");
        } else if self.applied > 0 {
            tracing::warn!(
                tx = self.id,
                applied = self.applied,
                "Rollback requested on a non-transactional store; writes already applied"
            );
        }
        Ok(())
    }
}
