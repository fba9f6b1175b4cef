//! Tests for concurrent use of the hierarchy manager.
//!
//! Verifies:
//! - Mutations on disjoint trees all complete
//! - Conflicting mutations on one tree are serialized, never interleaved
//! - Deadlines abort an operation without leaving partial writes

use std::sync::Arc;
use std::time::Duration;

use cadre_hierarchy::{HierarchyConfig, HierarchyError, HierarchyManager};
use cadre_protocol::{LeaderId, LeaderNode};
use cadre_state::{HierarchyStore, InMemoryStore};
use tokio::time::Instant;

fn id(s: &str) -> LeaderId {
    LeaderId::from(s)
}

fn child_of(parent: &LeaderNode, name: &str) -> LeaderNode {
    let mut node = LeaderNode::detached(id(name), name);
    node.attach_to(parent);
    node
}

fn manager_for(store: &Arc<InMemoryStore>, config: HierarchyConfig) -> HierarchyManager {
    HierarchyManager::new(store.clone(), config)
}

// ═══════════════════════════════════════════════════════════════
// Parallel mutations
// ═══════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_trees_mutate_in_parallel() {
    let mut records = Vec::new();
    for t in 0..8 {
        records.push(LeaderNode::coordinator(id(&format!("c{}", t)), "coordinator"));
        for n in 0..5 {
            records.push(LeaderNode::detached(id(&format!("n{}-{}", t, n)), "member"));
        }
    }
    let store = Arc::new(InMemoryStore::with_nodes(records).unwrap());
    let manager = manager_for(&store, HierarchyConfig::default());

    let mut handles = Vec::new();
    for t in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let root = id(&format!("c{}", t));
            let mut parent = root.clone();
            for n in 0..5 {
                let leader = id(&format!("n{}-{}", t, n));
                manager.add_subordinate(&parent, &leader).await?;
                parent = leader;
            }
            manager.count_subordinates(&root).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 5);
    }
    assert!(manager.audit().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossing_moves_only_one_wins() {
    for _ in 0..20 {
        let c = LeaderNode::coordinator(id("c"), "c");
        let a = child_of(&c, "a");
        let b = child_of(&c, "b");
        let store = Arc::new(InMemoryStore::with_nodes(vec![c, a, b]).unwrap());
        let manager = manager_for(&store, HierarchyConfig::default());

        let m1 = manager.clone();
        let m2 = manager.clone();
        let first = tokio::spawn(async move { m1.move_subtree(&id("a"), &id("b")).await });
        let second = tokio::spawn(async move { m2.move_subtree(&id("b"), &id("a")).await });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let cyclic = results
            .iter()
            .filter(|r| matches!(r, Err(HierarchyError::CyclicMove { .. })))
            .count();
        assert_eq!((ok, cyclic), (1, 1));
        assert!(manager.audit().await.unwrap().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_across_trees_keeps_forest_consistent() {
    let mut records = Vec::new();
    for t in 0..3 {
        let root = LeaderNode::coordinator(id(&format!("r{}", t)), "root");
        let mid = child_of(&root, &format!("m{}", t));
        let leaf = child_of(&mid, &format!("l{}", t));
        records.extend([root, mid, leaf]);
    }
    let store = Arc::new(InMemoryStore::with_nodes(records).unwrap());
    let manager = manager_for(
        &store,
        HierarchyConfig {
            lock_retries: 10,
            ..Default::default()
        },
    );

    let mut handles = Vec::new();
    for i in 0..30usize {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let mid = id(&format!("m{}", i % 3));
            let target = id(&format!("l{}", (i + 1) % 3));
            match i % 3 {
                0 => manager.move_subtree(&mid, &target).await.map(|_| ()),
                1 => manager.promote_to_coordinator(&mid).await.map(|_| ()),
                _ => manager.remove_from_hierarchy(&target).await.map(|_| ()),
            }
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            assert!(!err.is_fatal(), "unexpected fatal error: {}", err);
        }
    }
    assert!(manager.audit().await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════
// Deadlines
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn operation_timeout_aborts_blocked_mutation() {
    let c = LeaderNode::coordinator(id("c"), "c");
    let d = LeaderNode::detached(id("d"), "d");
    let store = Arc::new(InMemoryStore::with_nodes(vec![c, d]).unwrap());
    let manager = manager_for(
        &store,
        HierarchyConfig {
            operation_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    // An open transaction elsewhere keeps the store busy.
    let blocker = store.begin().await.unwrap();
    let res = manager.add_subordinate(&id("c"), &id("d")).await;
    assert!(matches!(res, Err(HierarchyError::DeadlineExceeded("add_subordinate"))));

    drop(blocker);
    assert!(store.get(&id("d")).await.unwrap().is_detached());
    manager.add_subordinate(&id("c"), &id("d")).await.unwrap();
}

#[tokio::test]
async fn explicit_deadline_applies_to_queries() {
    let store = Arc::new(
        InMemoryStore::with_nodes(vec![LeaderNode::coordinator(id("c"), "c")]).unwrap(),
    );
    let manager = manager_for(
        &store,
        HierarchyConfig {
            operation_timeout: None,
            ..Default::default()
        },
    );

    let blocker = store.begin().await.unwrap();
    let bounded = manager.with_deadline(Instant::now() + Duration::from_millis(30));
    let res = bounded.get_tree(&id("c"), false).await;
    assert!(matches!(res, Err(HierarchyError::DeadlineExceeded("get_tree"))));
    drop(blocker);

    assert_eq!(manager.get_tree(&id("c"), false).await.unwrap().count_subordinates(), 0);
}
