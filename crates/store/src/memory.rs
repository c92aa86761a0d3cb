//! An in-memory entity store for tests and development.

use crate::txn::TxnBuffer;
use ahash::AHashMap;
use quorum_api::store::{EntityStore, KvPair, StoreTxn};
use quorum_types::error::StoreError;
use quorum_types::keys;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Commit counter per entity group, the optimistic-concurrency token.
    versions: AHashMap<Vec<u8>, u64>,
}

impl Inner {
    fn version_of(&self, group: &[u8]) -> u64 {
        self.versions.get(group).copied().unwrap_or(0)
    }

    fn bump(&mut self, group: &[u8]) {
        *self.versions.entry(group.to_vec()).or_insert(0) += 1;
    }
}

/// A lock-protected B-tree implementing the full store contract, including
/// snapshot transactions with per-group optimistic validation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-write; the data is still the last
        // consistent committed state, so recover the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().data.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.data.insert(key.to_vec(), value.to_vec());
        if let Some(group) = keys::group_of(key) {
            let group = group.to_vec();
            inner.bump(&group);
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.data.remove(key);
        if let Some(group) = keys::group_of(key) {
            let group = group.to_vec();
            inner.bump(&group);
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        let inner = self.lock();
        Ok(scan(&inner.data, prefix))
    }

    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>, StoreError> {
        let inner = self.lock();
        Ok(Box::new(MemoryTxn {
            store: self,
            snapshot: inner.data.clone(),
            snapshot_versions: inner.versions.clone(),
            buffer: TxnBuffer::default(),
        }))
    }
}

fn scan(data: &BTreeMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<KvPair> {
    data.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

struct MemoryTxn<'a> {
    store: &'a MemoryStore,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    snapshot_versions: AHashMap<Vec<u8>, u64>,
    buffer: TxnBuffer,
}

impl MemoryTxn<'_> {
    fn snapshot_version(&self, group: &[u8]) -> u64 {
        self.snapshot_versions.get(group).copied().unwrap_or(0)
    }
}

impl StoreTxn for MemoryTxn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let version = self.snapshot_version(keys::group_of(key).unwrap_or_default());
        self.buffer.touch(key, |_| Ok(version))?;
        match self.buffer.overlay(key) {
            Some(staged) => Ok(staged.cloned()),
            None => Ok(self.snapshot.get(key).cloned()),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let version = self.snapshot_version(keys::group_of(key).unwrap_or_default());
        self.buffer.touch(key, |_| Ok(version))?;
        self.buffer.stage_put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        let version = self.snapshot_version(keys::group_of(key).unwrap_or_default());
        self.buffer.touch(key, |_| Ok(version))?;
        self.buffer.stage_delete(key);
        Ok(())
    }

    fn prefix_scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        let group = TxnBuffer::scan_group(prefix)?;
        let version = self.snapshot_version(&group);
        self.buffer.touch(prefix, |_| Ok(version))?;
        Ok(scan(&self.snapshot, prefix))
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        for (group, observed) in self.buffer.observed() {
            if inner.version_of(group) != observed {
                return Err(StoreError::Contention { attempts: 1 });
            }
        }
        for (key, value) in self.buffer.writes() {
            match value {
                Some(v) => {
                    inner.data.insert(key.clone(), v.clone());
                }
                None => {
                    inner.data.remove(key);
                }
            }
        }
        for group in self.buffer.write_groups()? {
            inner.bump(&group);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_api::store::run_in_transaction;

    fn k(b: &str, sub: &str) -> Vec<u8> {
        keys::rule_key(b, sub)
    }

    #[test]
    fn get_sees_own_writes_scan_does_not() {
        let store = MemoryStore::new();
        store.put(&k("b1", "r1"), b"old").unwrap();

        let mut txn = store.begin().unwrap();
        txn.put(&k("b1", "r2"), b"new").unwrap();
        assert_eq!(txn.get(&k("b1", "r2")).unwrap(), Some(b"new".to_vec()));

        // The scan is served from the snapshot: the staged write is invisible.
        let scanned = txn.prefix_scan(&keys::rule_prefix("b1")).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].0, k("b1", "r1"));

        txn.commit().unwrap();
        assert_eq!(store.prefix_scan(&keys::rule_prefix("b1")).unwrap().len(), 2);
    }

    #[test]
    fn conflicting_commit_is_contention() {
        let store = MemoryStore::new();
        store.put(&keys::blockable_key("b1"), b"v0").unwrap();

        let mut txn = store.begin().unwrap();
        let _ = txn.get(&keys::blockable_key("b1")).unwrap();
        txn.put(&keys::blockable_key("b1"), b"from-txn").unwrap();

        // A competing write lands between snapshot and commit.
        store.put(&keys::blockable_key("b1"), b"raced").unwrap();

        assert!(matches!(
            txn.commit(),
            Err(StoreError::Contention { .. })
        ));
        assert_eq!(
            store.get(&keys::blockable_key("b1")).unwrap(),
            Some(b"raced".to_vec())
        );
    }

    #[test]
    fn run_in_transaction_retries_until_clean() {
        let store = MemoryStore::new();
        store.put(&keys::blockable_key("b1"), b"0").unwrap();

        let mut sabotaged = false;
        let result: Result<(), StoreError> = run_in_transaction(&store, 3, |txn| {
            let _ = txn.get(&keys::blockable_key("b1"))?;
            txn.put(&keys::blockable_key("b1"), b"done")?;
            if !sabotaged {
                sabotaged = true;
                // First attempt loses the race; the retry must succeed.
                store.put(&keys::blockable_key("b1"), b"raced")?;
            }
            Ok(())
        });
        result.unwrap();
        assert_eq!(
            store.get(&keys::blockable_key("b1")).unwrap(),
            Some(b"done".to_vec())
        );
    }

    #[test]
    fn group_budget_is_enforced() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        for i in 0..quorum_api::store::MAX_GROUPS_PER_TXN {
            txn.put(&keys::blockable_key(&format!("b{i}")), b"x").unwrap();
        }
        let overflow = txn.put(&keys::blockable_key("one-too-many"), b"x");
        assert!(matches!(overflow, Err(StoreError::TooManyGroups { .. })));
    }

    #[test]
    fn kind_wide_scan_inside_txn_is_rejected() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        assert!(txn.prefix_scan(b"host::").is_err());
    }

    #[test]
    fn entities_in_one_group_commit_atomically() {
        let store = MemoryStore::new();
        let mut txn = store.begin().unwrap();
        txn.put(&keys::blockable_key("b1"), b"blockable").unwrap();
        txn.put(&keys::in_effect_vote_key("b1", "u@example.com"), b"vote").unwrap();
        txn.put(&k("b1", "r1"), b"rule").unwrap();
        txn.commit().unwrap();

        assert!(store.get(&keys::blockable_key("b1")).unwrap().is_some());
        assert!(store
            .get(&keys::in_effect_vote_key("b1", "u@example.com"))
            .unwrap()
            .is_some());
        assert!(store.get(&k("b1", "r1")).unwrap().is_some());
    }
}
