//! Hierarchy mutations: the four structural transitions plus registration.
//!
//! Each mutation is a small value type implementing [`Mutation`]. The
//! manager runs `apply` inside a single store transaction while holding the
//! locks of every tree named by `lock_seeds`, then re-checks the records
//! reported in `Applied::touched` before committing.
//!
//! Preconditions are checked in a fixed order so a request violating
//! several of them always gets the same error.

use async_trait::async_trait;

use cadre_protocol::{
    LeaderId, LeaderNode, MoveOutcome, NodeShape, PromotionOutcome, RemovalOutcome,
    COORDINATOR_LEVEL,
};
use cadre_state::{StoreError, StoreTransaction};

use crate::query;
use crate::HierarchyError;

/// Result of a mutation together with every record it wrote.
#[derive(Debug, Clone)]
pub struct Applied<T> {
    pub output: T,
    pub touched: Vec<LeaderId>,
}

#[async_trait]
pub trait Mutation: Clone + Send + Sync + 'static {
    type Output: Send + 'static;

    /// Operation name, used in logs and deadline errors.
    const NAME: &'static str;

    /// Leaders whose trees must be locked while the mutation runs.
    fn lock_seeds(&self) -> Vec<LeaderId>;

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        max_level: u32,
    ) -> Result<Applied<Self::Output>, HierarchyError>;
}

/// Rewrite the level of every descendant of `root_id` as its distance from
/// the root plus `root_level`. Inactive descendants are included.
///
/// Returns the number of descendants visited; records whose level already
/// matches are not rewritten.
async fn relevel_descendants(
    tx: &mut dyn StoreTransaction,
    root_id: &LeaderId,
    root_level: u32,
    touched: &mut Vec<LeaderId>,
    max_level: u32,
) -> Result<usize, HierarchyError> {
    let below = query::descendants(tx, root_id, true, max_level).await?;
    let count = below.len();

    for (mut node, distance) in below {
        let target = root_level + distance;
        if target > max_level {
            return Err(HierarchyError::DepthLimitExceeded {
                leader: node.id,
                attempted: target,
                max: max_level,
            });
        }
        if node.level != Some(target) {
            node.set_level(target);
            tx.write_node(&node).await?;
            touched.push(node.id);
        }
    }

    Ok(count)
}

// ═══════════════════════════════════════════════════════════════
// Add subordinate
// ═══════════════════════════════════════════════════════════════

/// Attach a detached leader directly under `parent_id`.
#[derive(Debug, Clone)]
pub struct AddSubordinate {
    pub parent_id: LeaderId,
    pub leader_id: LeaderId,
}

#[async_trait]
impl Mutation for AddSubordinate {
    type Output = LeaderNode;
    const NAME: &'static str = "add_subordinate";

    fn lock_seeds(&self) -> Vec<LeaderId> {
        vec![self.parent_id.clone(), self.leader_id.clone()]
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        max_level: u32,
    ) -> Result<Applied<LeaderNode>, HierarchyError> {
        let parent = query::load(tx, &self.parent_id).await?;
        let mut leader = query::load(tx, &self.leader_id).await?;

        if leader.parent_id.is_some() {
            return Err(HierarchyError::AlreadyAttached(leader.id));
        }
        if leader.is_coordinator {
            return Err(HierarchyError::AlreadyCoordinator(leader.id));
        }
        if leader.level.is_some() {
            return Err(HierarchyError::ConsistencyViolation(format!(
                "{} has level {:?} but no parent and no coordinator flag",
                leader.id, leader.level
            )));
        }
        if leader.id == parent.id {
            return Err(HierarchyError::CyclicMove {
                node: leader.id,
                target: parent.id,
            });
        }

        let Some(parent_level) = parent.level else {
            return Err(HierarchyError::Detached(parent.id));
        };
        if !parent.is_active {
            return Err(HierarchyError::Inactive(parent.id));
        }
        if parent_level >= max_level {
            return Err(HierarchyError::DepthLimitExceeded {
                leader: leader.id,
                attempted: parent_level + 1,
                max: max_level,
            });
        }

        leader.attach_to(&parent);
        tx.write_node(&leader).await?;

        Ok(Applied {
            touched: vec![leader.id.clone()],
            output: leader,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// Remove from hierarchy
// ═══════════════════════════════════════════════════════════════

/// Detach a leader, handing its direct children to its former parent.
///
/// Children of a removed coordinator each become the root of a new tree.
/// Deeper descendants are re-leveled so every level stays consistent.
#[derive(Debug, Clone)]
pub struct RemoveFromHierarchy {
    pub node_id: LeaderId,
}

#[async_trait]
impl Mutation for RemoveFromHierarchy {
    type Output = RemovalOutcome;
    const NAME: &'static str = "remove_from_hierarchy";

    fn lock_seeds(&self) -> Vec<LeaderId> {
        vec![self.node_id.clone()]
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        max_level: u32,
    ) -> Result<Applied<RemovalOutcome>, HierarchyError> {
        let mut node = query::load(tx, &self.node_id).await?;
        if node.is_detached() {
            return Ok(Applied {
                output: RemovalOutcome {
                    reparented: Vec::new(),
                },
                touched: Vec::new(),
            });
        }

        let grandparent = match &node.parent_id {
            Some(parent_id) => Some(tx.get_node(parent_id).await?.ok_or_else(|| {
                HierarchyError::ConsistencyViolation(format!(
                    "{} references missing parent {}",
                    node.id, parent_id
                ))
            })?),
            None => None,
        };

        let mut touched = vec![node.id.clone()];
        let mut reparented = Vec::new();

        for mut child in tx.get_children(&node.id, true).await? {
            match &grandparent {
                Some(grandparent) => child.attach_to(grandparent),
                None => child.make_root(),
            }
            let Some(child_level) = child.level else {
                return Err(HierarchyError::ConsistencyViolation(format!(
                    "grandparent of {} has no level",
                    child.id
                )));
            };
            tx.write_node(&child).await?;
            touched.push(child.id.clone());
            relevel_descendants(tx, &child.id, child_level, &mut touched, max_level).await?;
            reparented.push(child);
        }

        node.detach();
        tx.write_node(&node).await?;

        Ok(Applied {
            output: RemovalOutcome { reparented },
            touched,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// Move subtree
// ═══════════════════════════════════════════════════════════════

/// Re-parent a leader, taking its whole subtree along.
#[derive(Debug, Clone)]
pub struct MoveSubtree {
    pub node_id: LeaderId,
    pub new_parent_id: LeaderId,
}

#[async_trait]
impl Mutation for MoveSubtree {
    type Output = MoveOutcome;
    const NAME: &'static str = "move_subtree";

    fn lock_seeds(&self) -> Vec<LeaderId> {
        vec![self.node_id.clone(), self.new_parent_id.clone()]
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        max_level: u32,
    ) -> Result<Applied<MoveOutcome>, HierarchyError> {
        let mut node = query::load(tx, &self.node_id).await?;
        let new_parent = query::load(tx, &self.new_parent_id).await?;

        if node.id == new_parent.id {
            return Err(HierarchyError::CyclicMove {
                node: node.id,
                target: new_parent.id,
            });
        }
        if !node.is_attached() {
            return Err(HierarchyError::Detached(node.id));
        }
        let Some(parent_level) = new_parent.level else {
            return Err(HierarchyError::Detached(new_parent.id));
        };

        // The target's root path contains the node iff the target sits
        // somewhere inside the moved subtree.
        let target_path = query::hierarchy_path(tx, &new_parent.id, max_level).await?;
        if target_path.iter().any(|ancestor| ancestor.id == node.id) {
            return Err(HierarchyError::CyclicMove {
                node: node.id,
                target: new_parent.id,
            });
        }
        if !new_parent.is_active {
            return Err(HierarchyError::Inactive(new_parent.id));
        }

        let depth = query::subtree_depth(tx, &node.id, max_level).await?;
        let deepest = parent_level + 1 + depth;
        if deepest > max_level {
            return Err(HierarchyError::DepthLimitExceeded {
                leader: node.id,
                attempted: deepest,
                max: max_level,
            });
        }

        let new_level = parent_level + 1;
        if node.parent_id.as_ref() == Some(&new_parent.id) && node.level == Some(new_level) {
            return Ok(Applied {
                output: MoveOutcome { new_level },
                touched: vec![node.id],
            });
        }

        node.attach_to(&new_parent);
        tx.write_node(&node).await?;
        let mut touched = vec![node.id.clone()];
        relevel_descendants(tx, &node.id, new_level, &mut touched, max_level).await?;

        Ok(Applied {
            output: MoveOutcome { new_level },
            touched,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// Promote to coordinator
// ═══════════════════════════════════════════════════════════════

/// Cut a leader loose from its parent and make it the root of its own tree.
#[derive(Debug, Clone)]
pub struct PromoteToCoordinator {
    pub node_id: LeaderId,
}

#[async_trait]
impl Mutation for PromoteToCoordinator {
    type Output = PromotionOutcome;
    const NAME: &'static str = "promote_to_coordinator";

    fn lock_seeds(&self) -> Vec<LeaderId> {
        vec![self.node_id.clone()]
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        max_level: u32,
    ) -> Result<Applied<PromotionOutcome>, HierarchyError> {
        let mut node = query::load(tx, &self.node_id).await?;
        if node.is_coordinator || node.is_root() {
            return Err(HierarchyError::AlreadyCoordinator(node.id));
        }

        node.make_root();
        tx.write_node(&node).await?;
        let mut touched = vec![node.id.clone()];
        let relevel_count =
            relevel_descendants(tx, &node.id, COORDINATOR_LEVEL, &mut touched, max_level).await?;

        Ok(Applied {
            output: PromotionOutcome { relevel_count },
            touched,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════

/// Write a fresh detached or coordinator record.
///
/// Not one of the structural transitions: it only creates a record in one
/// of the two shapes a leader may start out in.
#[derive(Debug, Clone)]
pub struct RegisterLeader {
    pub node: LeaderNode,
}

#[async_trait]
impl Mutation for RegisterLeader {
    type Output = LeaderNode;
    const NAME: &'static str = "register_leader";

    fn lock_seeds(&self) -> Vec<LeaderId> {
        vec![self.node.id.clone()]
    }

    async fn apply(
        &self,
        tx: &mut dyn StoreTransaction,
        _max_level: u32,
    ) -> Result<Applied<LeaderNode>, HierarchyError> {
        if tx.get_node(&self.node.id).await?.is_some() {
            return Err(StoreError::DuplicateId(self.node.id.clone()).into());
        }
        match self.node.shape() {
            Some(NodeShape::Detached) | Some(NodeShape::Coordinator) => {}
            _ => return Err(HierarchyError::AlreadyAttached(self.node.id.clone())),
        }

        tx.write_node(&self.node).await?;
        Ok(Applied {
            output: self.node.clone(),
            touched: vec![self.node.id.clone()],
        })
    }
}
