use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{COORDINATOR_LEVEL, MAX_LEVEL};
use crate::identity::LeaderId;

/// The legal shapes a leader record can be in.
///
/// The four hierarchy mutations are the only transitions between shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeShape {
    /// No parent and not a coordinator: pre-registration or post-removal.
    Detached,
    /// Root of a tree (level 1).
    Coordinator,
    /// Member of a tree below its root, at the given level (2..=MAX_LEVEL).
    Attached(u32),
}

/// One participant in the hierarchy.
///
/// Only `parent_id` is stored; children are always derived by querying
/// for records whose parent is this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderNode {
    pub id: LeaderId,
    pub name: String,
    pub parent_id: Option<LeaderId>,
    /// 1 for coordinators, `parent.level + 1` otherwise, `None` when detached.
    pub level: Option<u32>,
    pub is_coordinator: bool,
    /// Inactive leaders stay in the tree for audit but are hidden from
    /// active-tree traversals.
    pub is_active: bool,
    /// Maintained by external processes; the hierarchy engine never writes it.
    #[serde(default)]
    pub score: i64,
    /// Maintained by external processes; the hierarchy engine never writes it.
    #[serde(default)]
    pub registration_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaderNode {
    /// A fresh root of its own tree.
    pub fn coordinator(id: LeaderId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            parent_id: None,
            level: Some(COORDINATOR_LEVEL),
            is_coordinator: true,
            is_active: true,
            score: 0,
            registration_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh record that is not yet part of any tree.
    pub fn detached(id: LeaderId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            parent_id: None,
            level: None,
            is_coordinator: false,
            is_active: true,
            score: 0,
            registration_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Classify the record, or `None` if its fields do not describe any
    /// legal shape (e.g. a parent without a level).
    pub fn shape(&self) -> Option<NodeShape> {
        match (&self.parent_id, self.level, self.is_coordinator) {
            (None, None, false) => Some(NodeShape::Detached),
            (None, Some(COORDINATOR_LEVEL), true) => Some(NodeShape::Coordinator),
            (Some(_), Some(level), false) if level > COORDINATOR_LEVEL && level <= MAX_LEVEL => {
                Some(NodeShape::Attached(level))
            }
            _ => None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none() && self.level.is_some()
    }

    pub fn is_detached(&self) -> bool {
        self.parent_id.is_none() && self.level.is_none() && !self.is_coordinator
    }

    /// Whether the record currently belongs to some tree.
    pub fn is_attached(&self) -> bool {
        self.level.is_some()
    }

    /// Level a direct child of this node would occupy.
    pub fn child_level(&self) -> Option<u32> {
        self.level.map(|level| level + 1)
    }

    /// Hang this node under `parent`, one level below it.
    pub fn attach_to(&mut self, parent: &LeaderNode) {
        self.parent_id = Some(parent.id.clone());
        self.level = parent.child_level();
        self.is_coordinator = false;
        self.touch();
    }

    /// Turn this node into the root of its own tree.
    pub fn make_root(&mut self) {
        self.parent_id = None;
        self.level = Some(COORDINATOR_LEVEL);
        self.is_coordinator = true;
        self.touch();
    }

    /// Take this node out of every tree.
    pub fn detach(&mut self) {
        self.parent_id = None;
        self.level = None;
        self.is_coordinator = false;
        self.touch();
    }

    pub fn set_level(&mut self, level: u32) {
        self.level = Some(level);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of removing a leader from the hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalOutcome {
    /// Former direct children, as written after reparenting.
    pub reparented: Vec<LeaderNode>,
}

/// Result of relocating a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub new_level: u32,
}

/// Result of promoting a leader to coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionOutcome {
    /// Number of descendants whose level was recomputed.
    pub relevel_count: usize,
}
