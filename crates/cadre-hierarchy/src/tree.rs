//! Materialized leader trees and the pure algorithms over them.
//!
//! A `LeaderTree` is a read-only snapshot of one subtree, built from the
//! store for display. Nothing here writes back; expansion state and other
//! view concerns belong to whoever renders the tree.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use cadre_protocol::{LeaderId, LeaderNode};

/// A node together with its (recursively materialized) children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderTree {
    pub node: LeaderNode,
    pub children: Vec<LeaderTree>,
}

impl LeaderTree {
    pub fn leaf(node: LeaderNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Build a tree rooted at `root` from its descendants.
    ///
    /// Descendants whose parent is not reachable from `root` are ignored.
    /// Children keep the order in which they appear in `descendants`.
    pub fn assemble<I>(root: LeaderNode, descendants: I) -> Self
    where
        I: IntoIterator<Item = LeaderNode>,
    {
        let mut by_parent: HashMap<LeaderId, Vec<LeaderNode>> = HashMap::new();
        for node in descendants {
            if let Some(parent) = node.parent_id.clone() {
                by_parent.entry(parent).or_default().push(node);
            }
        }
        Self::build(root, &mut by_parent)
    }

    fn build(node: LeaderNode, by_parent: &mut HashMap<LeaderId, Vec<LeaderNode>>) -> Self {
        let children = by_parent
            .remove(&node.id)
            .unwrap_or_default()
            .into_iter()
            .map(|child| Self::build(child, by_parent))
            .collect();
        Self { node, children }
    }

    pub fn id(&self) -> &LeaderId {
        &self.node.id
    }

    /// Total number of descendants (not just direct children).
    pub fn count_subordinates(&self) -> usize {
        self.children
            .iter()
            .map(|child| 1 + child.count_subordinates())
            .sum()
    }

    /// Maximum number of edges from this node down to any descendant.
    pub fn depth(&self) -> u32 {
        self.children
            .iter()
            .map(|child| 1 + child.depth())
            .max()
            .unwrap_or(0)
    }

    pub fn find(&self, id: &LeaderId) -> Option<&LeaderTree> {
        if self.id() == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Ids on the path from this root down to `target`, both included.
    ///
    /// Depth-first with early exit: once `target` is found, the remaining
    /// sibling subtrees are never visited. `None` if `target` is not in
    /// this tree.
    pub fn find_path_to_node(&self, target: &LeaderId) -> Option<HashSet<LeaderId>> {
        let mut path = Vec::new();
        if self.path_into(target, &mut path) {
            Some(path.into_iter().cloned().collect())
        } else {
            None
        }
    }

    fn path_into<'a>(&'a self, target: &LeaderId, path: &mut Vec<&'a LeaderId>) -> bool {
        path.push(self.id());
        if self.id() == target {
            return true;
        }
        for child in &self.children {
            if child.path_into(target, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Pre-order iterator over every node in the tree.
    pub fn iter(&self) -> impl Iterator<Item = &LeaderNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let tree = stack.pop()?;
            stack.extend(tree.children.iter().rev());
            Some(&tree.node)
        })
    }
}

/// Dashboard summary of one coordinator's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub root: LeaderId,
    /// All nodes in the tree, root included.
    pub total: usize,
    pub active: usize,
    /// Node count per level; index 0 is level 1.
    pub per_level: Vec<usize>,
    /// Subtree depth of the root, in edges.
    pub max_depth: u32,
}

impl TreeStats {
    pub fn from_tree(tree: &LeaderTree, max_level: u32) -> Self {
        let mut per_level = vec![0usize; max_level as usize];
        let mut total = 0;
        let mut active = 0;
        for node in tree.iter() {
            total += 1;
            if node.is_active {
                active += 1;
            }
            if let Some(level) = node.level {
                if let Some(slot) = per_level.get_mut(level.saturating_sub(1) as usize) {
                    *slot += 1;
                }
            }
        }
        Self {
            root: tree.id().clone(),
            total,
            active,
            per_level,
            max_depth: tree.depth(),
        }
    }
}
