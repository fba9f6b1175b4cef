//! In-process tree locks.
//!
//! Mutations on disjoint trees may run concurrently; mutations touching the
//! same tree are serialized. A lock is keyed by the id of the tree's root
//! (or by the leader itself for detached leaders). When an operation spans
//! several trees it acquires their locks in sorted key order, so two
//! operations can never wait on each other in a cycle.
//!
//! Entries nobody holds or waits on are pruned on the next acquisition.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use cadre_protocol::LeaderId;

#[derive(Default)]
pub struct TreeLocks {
    table: StdMutex<HashMap<LeaderId, Arc<Mutex<()>>>>,
}

/// Held tree locks; released on drop.
pub struct TreeGuard {
    keys: Vec<LeaderId>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl TreeGuard {
    pub fn keys(&self) -> &[LeaderId] {
        &self.keys
    }
}

impl TreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, in sorted order. Duplicate keys are locked once.
    pub async fn acquire<I>(&self, keys: I) -> TreeGuard
    where
        I: IntoIterator<Item = LeaderId>,
    {
        let keys: BTreeSet<LeaderId> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.entry(key);
            guards.push(lock.lock_owned().await);
        }
        tracing::trace!(trees = keys.len(), "Tree locks acquired");
        TreeGuard {
            keys: keys.into_iter().collect(),
            _guards: guards,
        }
    }

    /// Number of keys currently tracked in the table.
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entry(&self, key: &LeaderId) -> Arc<Mutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(table.entry(key.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tree_serialized() {
        let locks = Arc::new(TreeLocks::new());
        let guard = locks.acquire(vec![LeaderId::from("root")]).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire(vec![LeaderId::from("root")]).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_trees_do_not_block() {
        let locks = TreeLocks::new();
        let _a = locks.acquire(vec![LeaderId::from("a")]).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(vec![LeaderId::from("b")]),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_keys_locked_once() {
        let locks = TreeLocks::new();
        let guard = locks
            .acquire(vec![LeaderId::from("x"), LeaderId::from("x")])
            .await;
        assert_eq!(guard.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_released_entries_pruned() {
        let locks = TreeLocks::new();
        drop(locks.acquire(vec![LeaderId::from("a")]).await);
        let _b = locks.acquire(vec![LeaderId::from("b")]).await;
        assert_eq!(locks.tracked(), 1);
    }
}
