//! Forest invariants and their validation.
//!
//! The invariants every committed forest must satisfy:
//! - Bounded depth: no level above the maximum
//! - Level consistency: a non-root sits exactly one level below its parent
//! - Acyclicity: every parent chain reaches a root within the maximum depth
//! - Root shape: roots (no parent) are coordinators at level 1, detached
//!   records carry neither level nor coordinator flag
//! - Single ownership: one record per id, hence one parent per leader
//!
//! `validate_forest` checks a complete record set and is used by audits and
//! post-commit verification. `check_touched` re-checks only the neighbourhood
//! of the records a mutation wrote, inside its transaction, before commit.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use cadre_protocol::{LeaderId, LeaderNode, COORDINATOR_LEVEL};
use cadre_state::StoreTransaction;

use crate::HierarchyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    DepthBound,
    LevelConsistency,
    Acyclicity,
    RootShape,
    SingleOwnership,
    MissingParent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub leader: LeaderId,
    pub kind: ViolationKind,
    pub detail: String,
}

impl Violation {
    fn new(leader: &LeaderId, kind: ViolationKind, detail: String) -> Self {
        Self {
            leader: leader.clone(),
            kind,
            detail,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at {}: {}", self.kind, self.leader, self.detail)
    }
}

/// Violations of a single record against its parent, if any.
fn check_node(
    node: &LeaderNode,
    parent: Option<&LeaderNode>,
    max_level: u32,
    out: &mut Vec<Violation>,
) {
    if let Some(level) = node.level {
        if level > max_level {
            out.push(Violation::new(
                &node.id,
                ViolationKind::DepthBound,
                format!("level {} exceeds {}", level, max_level),
            ));
        }
    }

    match (&node.parent_id, node.level) {
        (None, None) => {
            if node.is_coordinator {
                out.push(Violation::new(
                    &node.id,
                    ViolationKind::RootShape,
                    "detached record flagged as coordinator".into(),
                ));
            }
        }
        (None, Some(level)) => {
            if level != COORDINATOR_LEVEL || !node.is_coordinator {
                out.push(Violation::new(
                    &node.id,
                    ViolationKind::RootShape,
                    format!(
                        "root at level {} with coordinator flag {}",
                        level, node.is_coordinator
                    ),
                ));
            }
        }
        (Some(parent_id), level) => {
            if node.is_coordinator {
                out.push(Violation::new(
                    &node.id,
                    ViolationKind::RootShape,
                    format!("coordinator has parent {}", parent_id),
                ));
            }
            match parent {
                None => out.push(Violation::new(
                    &node.id,
                    ViolationKind::MissingParent,
                    format!("parent {} does not exist", parent_id),
                )),
                Some(parent) => {
                    let expected = parent.child_level();
                    if expected.is_none() || level != expected {
                        out.push(Violation::new(
                            &node.id,
                            ViolationKind::LevelConsistency,
                            format!(
                                "level {:?} under parent {} at level {:?}",
                                level, parent.id, parent.level
                            ),
                        ));
                    }
                }
            }
        }
    }
}

/// Check every invariant over a complete set of records.
pub fn validate_forest(nodes: &[LeaderNode], max_level: u32) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut by_id: HashMap<&LeaderId, &LeaderNode> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        if by_id.insert(&node.id, node).is_some() {
            violations.push(Violation::new(
                &node.id,
                ViolationKind::SingleOwnership,
                "id appears more than once".into(),
            ));
        }
    }

    for node in nodes {
        let parent = node.parent_id.as_ref().and_then(|p| by_id.get(p).copied());
        check_node(node, parent, max_level, &mut violations);

        // Walk up at most max_level steps; a root must be reached by then.
        let mut current = node;
        let mut visited: HashSet<&LeaderId> = HashSet::from([&node.id]);
        let mut steps = 0;
        while let Some(parent_id) = &current.parent_id {
            let Some(parent) = by_id.get(parent_id).copied() else {
                break;
            };
            steps += 1;
            if !visited.insert(&parent.id) || steps >= max_level {
                violations.push(Violation::new(
                    &node.id,
                    ViolationKind::Acyclicity,
                    format!("parent chain does not reach a root within {} steps", max_level),
                ));
                break;
            }
            current = parent;
        }
    }

    violations
}

/// Re-check the records a mutation wrote, plus their parents and children.
///
/// Runs inside the mutation's transaction so a failure can still roll the
/// whole operation back.
pub async fn check_touched(
    tx: &mut dyn StoreTransaction,
    touched: &[LeaderId],
    max_level: u32,
) -> Result<(), HierarchyError> {
    let mut violations = Vec::new();
    let mut checked: HashSet<LeaderId> = HashSet::new();

    for id in touched {
        if !checked.insert(id.clone()) {
            continue;
        }
        let Some(node) = tx.get_node(id).await? else {
            violations.push(Violation::new(
                id,
                ViolationKind::MissingParent,
                "written record vanished".into(),
            ));
            continue;
        };

        let parent = match &node.parent_id {
            Some(parent_id) => tx.get_node(parent_id).await?,
            None => None,
        };
        check_node(&node, parent.as_ref(), max_level, &mut violations);

        if node.is_attached() {
            if let Err(err) = crate::query::hierarchy_path(tx, id, max_level).await {
                violations.push(Violation::new(id, ViolationKind::Acyclicity, err.to_string()));
            }
        }

        for child in tx.get_children(id, true).await? {
            if child.level.is_none() || child.level != node.child_level() {
                violations.push(Violation::new(
                    &child.id,
                    ViolationKind::LevelConsistency,
                    format!(
                        "level {:?} under parent {} at level {:?}",
                        child.level, node.id, node.level
                    ),
                ));
            }
        }
    }

    if violations.is_empty() {
        return Ok(());
    }
    Err(HierarchyError::ConsistencyViolation(summarize(&violations)))
}

/// One-line description of a violation list, for errors and logs.
pub fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_protocol::MAX_LEVEL;

    fn child_of(parent: &LeaderNode, id: &str) -> LeaderNode {
        let mut n = LeaderNode::detached(id.into(), id);
        n.attach_to(parent);
        n
    }

    #[test]
    fn test_valid_forest_has_no_violations() {
        let c = LeaderNode::coordinator("c".into(), "c");
        let a = child_of(&c, "a");
        let b = child_of(&a, "b");
        let d = LeaderNode::detached("d".into(), "d");
        assert!(validate_forest(&[c, a, b, d], MAX_LEVEL).is_empty());
    }

    #[test]
    fn test_level_mismatch_reported() {
        let c = LeaderNode::coordinator("c".into(), "c");
        let mut a = child_of(&c, "a");
        a.level = Some(4);
        let violations = validate_forest(&[c, a], MAX_LEVEL);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::LevelConsistency);
    }

    #[test]
    fn test_missing_parent_reported() {
        let c = LeaderNode::coordinator("c".into(), "c");
        let a = child_of(&c, "a");
        let violations = validate_forest(&[a], MAX_LEVEL);
        assert!(violations.iter().any(|v| v.kind == ViolationKind::MissingParent));
    }

    #[test]
    fn test_cycle_reported() {
        let mut a = LeaderNode::detached("a".into(), "a");
        let mut b = LeaderNode::detached("b".into(), "b");
        a.parent_id = Some("b".into());
        a.level = Some(2);
        b.parent_id = Some("a".into());
        b.level = Some(3);
        let violations = validate_forest(&[a, b], MAX_LEVEL);
        assert!(violations.iter().any(|v| v.kind == ViolationKind::Acyclicity));
    }

    #[test]
    fn test_root_shape_reported() {
        let mut r = LeaderNode::coordinator("r".into(), "r");
        r.level = Some(2);
        let violations = validate_forest(&[r], MAX_LEVEL);
        assert_eq!(violations[0].kind, ViolationKind::RootShape);
    }

    #[test]
    fn test_duplicate_id_reported() {
        let c = LeaderNode::coordinator("c".into(), "c");
        let violations = validate_forest(&[c.clone(), c], MAX_LEVEL);
        assert!(violations.iter().any(|v| v.kind == ViolationKind::SingleOwnership));
    }

    #[test]
    fn test_depth_bound_reported() {
        let mut nodes = vec![LeaderNode::coordinator("l1".into(), "l1")];
        for level in 2..=MAX_LEVEL + 1 {
            let n = child_of(nodes.last().unwrap(), &format!("l{}", level));
            nodes.push(n);
        }
        let violations = validate_forest(&nodes, MAX_LEVEL);
        assert!(violations.iter().any(|v| v.kind == ViolationKind::DepthBound));
    }
}
