//! Read-only traversals against a store transaction.
//!
//! Every walk is bounded by the maximum level: a parent chain or a subtree
//! that runs deeper than the forest allows can only come from corrupted
//! data, and is reported as a consistency violation instead of looping.

use std::collections::{BTreeSet, HashSet, VecDeque};

use cadre_protocol::{LeaderId, LeaderNode};
use cadre_state::StoreTransaction;

use crate::tree::LeaderTree;
use crate::HierarchyError;

/// Fetch a record or fail with `NotFound`.
pub async fn load(
    tx: &mut dyn StoreTransaction,
    id: &LeaderId,
) -> Result<LeaderNode, HierarchyError> {
    tx.get_node(id)
        .await?
        .ok_or_else(|| HierarchyError::NotFound(id.clone()))
}

/// All descendants of `root` with their distance (in edges) from it.
///
/// Breadth-first, so distances are non-decreasing. When
/// `include_inactive` is false, inactive nodes and everything below them
/// are skipped.
pub async fn descendants(
    tx: &mut dyn StoreTransaction,
    root: &LeaderId,
    include_inactive: bool,
    max_level: u32,
) -> Result<Vec<(LeaderNode, u32)>, HierarchyError> {
    let mut found = Vec::new();
    let mut seen: HashSet<LeaderId> = HashSet::from([root.clone()]);
    let mut queue: VecDeque<(LeaderId, u32)> = VecDeque::from([(root.clone(), 0)]);

    while let Some((id, distance)) = queue.pop_front() {
        let children = tx.get_children(&id, include_inactive).await?;
        if children.is_empty() {
            continue;
        }
        if distance + 1 >= max_level {
            return Err(HierarchyError::ConsistencyViolation(format!(
                "subtree of {} is deeper than {} levels",
                root, max_level
            )));
        }
        for child in children {
            if !seen.insert(child.id.clone()) {
                return Err(HierarchyError::ConsistencyViolation(format!(
                    "cycle through {} below {}",
                    child.id, root
                )));
            }
            queue.push_back((child.id.clone(), distance + 1));
            found.push((child, distance + 1));
        }
    }

    Ok(found)
}

/// Maximum number of edges from `id` to any of its descendants, active or
/// not. A leaf has depth 0.
pub async fn subtree_depth(
    tx: &mut dyn StoreTransaction,
    id: &LeaderId,
    max_level: u32,
) -> Result<u32, HierarchyError> {
    let below = descendants(tx, id, true, max_level).await?;
    Ok(below.last().map(|(_, distance)| *distance).unwrap_or(0))
}

/// Nodes from the tree root down to `id`, inclusive.
///
/// Follows `parent_id` upward and reverses. The path length equals the
/// node's level.
pub async fn hierarchy_path(
    tx: &mut dyn StoreTransaction,
    id: &LeaderId,
    max_level: u32,
) -> Result<Vec<LeaderNode>, HierarchyError> {
    let node = load(tx, id).await?;
    if !node.is_attached() {
        return Err(HierarchyError::Detached(id.clone()));
    }

    let mut path = vec![node];
    while let Some(parent_id) = path.last().and_then(|n| n.parent_id.clone()) {
        if path.len() as u32 >= max_level {
            return Err(HierarchyError::ConsistencyViolation(format!(
                "parent chain of {} does not reach a root within {} steps",
                id, max_level
            )));
        }
        let parent = tx.get_node(&parent_id).await?.ok_or_else(|| {
            HierarchyError::ConsistencyViolation(format!(
                "{} references missing parent {}",
                path.last().map(|n| n.id.as_str()).unwrap_or_default(),
                parent_id
            ))
        })?;
        path.push(parent);
    }

    path.reverse();
    Ok(path)
}

/// Materialize the subtree rooted at `root_id`.
pub async fn materialize(
    tx: &mut dyn StoreTransaction,
    root_id: &LeaderId,
    include_inactive: bool,
    max_level: u32,
) -> Result<LeaderTree, HierarchyError> {
    let root = load(tx, root_id).await?;
    if !root.is_attached() {
        return Err(HierarchyError::Detached(root_id.clone()));
    }
    if !include_inactive && !root.is_active {
        return Err(HierarchyError::Inactive(root_id.clone()));
    }

    let below = descendants(tx, root_id, include_inactive, max_level).await?;
    Ok(LeaderTree::assemble(
        root,
        below.into_iter().map(|(node, _)| node),
    ))
}

/// The key a leader's tree is locked under: the id at the top of its
/// parent chain. Detached and unknown leaders are their own key.
pub async fn lock_key(
    tx: &mut dyn StoreTransaction,
    id: &LeaderId,
    max_level: u32,
) -> Result<LeaderId, HierarchyError> {
    let mut current = id.clone();
    for _ in 0..max_level {
        match tx.get_node(&current).await? {
            Some(LeaderNode {
                parent_id: Some(parent),
                ..
            }) => current = parent,
            _ => return Ok(current),
        }
    }
    Ok(current)
}

pub async fn lock_keys(
    tx: &mut dyn StoreTransaction,
    seeds: &[LeaderId],
    max_level: u32,
) -> Result<BTreeSet<LeaderId>, HierarchyError> {
    let mut keys = BTreeSet::new();
    for seed in seeds {
        keys.insert(lock_key(tx, seed, max_level).await?);
    }
    Ok(keys)
}
