//! A single-file persistent entity store backed by `redb`.

use crate::txn::TxnBuffer;
use quorum_api::store::{EntityStore, KvPair, StoreTxn};
use quorum_types::error::StoreError;
use quorum_types::keys;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition};
use std::path::Path;

const ENTITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ENTITIES");
/// Commit counter per entity group, the optimistic-concurrency token.
const GROUPS: TableDefinition<&[u8], u64> = TableDefinition::new("GROUPS");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// A persistent store holding every entity in one `redb` database file.
///
/// Engine transactions never hold the database's write lock across their
/// lifetime: reads come from an MVCC snapshot, writes are buffered, and the
/// commit applies the buffer in one short write transaction after validating
/// the optimistic read-set.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        // Ensure tables exist.
        {
            let w = db.begin_write().map_err(backend)?;
            {
                w.open_table(ENTITIES).map_err(backend)?;
                w.open_table(GROUPS).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }
        Ok(Self { db })
    }

    fn read_txn(&self) -> Result<ReadTransaction<'_>, StoreError> {
        self.db.begin_read().map_err(backend)
    }
}

fn read_version(read: &ReadTransaction<'_>, group: &[u8]) -> Result<u64, StoreError> {
    let table = read.open_table(GROUPS).map_err(backend)?;
    let value = table
        .get(group)
        .map_err(backend)?
        .map(|g| g.value())
        .unwrap_or(0);
    Ok(value)
}

fn scan_snapshot(read: &ReadTransaction<'_>, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
    let table = read.open_table(ENTITIES).map_err(backend)?;
    let result = table
        .range(prefix..)
        .map_err(backend)?
        .take_while(|r| r.as_ref().is_ok_and(|(k, _)| k.value().starts_with(prefix)))
        .map(|r| {
            r.map(|(k, v)| (k.value().to_vec(), v.value().to_vec()))
                .map_err(backend)
        })
        .collect();
    result
}

impl EntityStore for RedbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let read = self.read_txn()?;
        let table = read.open_table(ENTITIES).map_err(backend)?;
        let value = table.get(key).map_err(backend)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut entities = w.open_table(ENTITIES).map_err(backend)?;
            entities.insert(key, value).map_err(backend)?;
            if let Some(group) = keys::group_of(key) {
                let group = group.to_vec();
                let mut groups = w.open_table(GROUPS).map_err(backend)?;
                let next = groups
                    .get(group.as_slice())
                    .map_err(backend)?
                    .map(|g| g.value())
                    .unwrap_or(0)
                    + 1;
                groups.insert(group.as_slice(), next).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut entities = w.open_table(ENTITIES).map_err(backend)?;
            entities.remove(key).map_err(backend)?;
            if let Some(group) = keys::group_of(key) {
                let group = group.to_vec();
                let mut groups = w.open_table(GROUPS).map_err(backend)?;
                let next = groups
                    .get(group.as_slice())
                    .map_err(backend)?
                    .map(|g| g.value())
                    .unwrap_or(0)
                    + 1;
                groups.insert(group.as_slice(), next).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        let read = self.read_txn()?;
        scan_snapshot(&read, prefix)
    }

    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>, StoreError> {
        let read = self.read_txn()?;
        Ok(Box::new(RedbTxn {
            db: &self.db,
            read,
            buffer: TxnBuffer::default(),
        }))
    }
}

struct RedbTxn<'a> {
    db: &'a Database,
    read: ReadTransaction<'a>,
    buffer: TxnBuffer,
}

impl StoreTxn for RedbTxn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let read = &self.read;
        self.buffer.touch(key, |group| read_version(read, group))?;
        if let Some(staged) = self.buffer.overlay(key) {
            return Ok(staged.cloned());
        }
        let table = self.read.open_table(ENTITIES).map_err(backend)?;
        let value = table.get(key).map_err(backend)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let read = &self.read;
        self.buffer.touch(key, |group| read_version(read, group))?;
        self.buffer.stage_put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        let read = &self.read;
        self.buffer.touch(key, |group| read_version(read, group))?;
        self.buffer.stage_delete(key);
        Ok(())
    }

    fn prefix_scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError> {
        TxnBuffer::scan_group(prefix)?;
        let read = &self.read;
        self.buffer.touch(prefix, |group| read_version(read, group))?;
        scan_snapshot(&self.read, prefix)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut groups = w.open_table(GROUPS).map_err(backend)?;
            for (group, observed) in self.buffer.observed() {
                let live = groups
                    .get(group.as_slice())
                    .map_err(backend)?
                    .map(|g| g.value())
                    .unwrap_or(0);
                if live != observed {
                    return Err(StoreError::Contention { attempts: 1 });
                }
            }
            let mut entities = w.open_table(ENTITIES).map_err(backend)?;
            for (key, value) in self.buffer.writes() {
                match value {
                    Some(v) => {
                        entities.insert(key.as_slice(), v.as_slice()).map_err(backend)?;
                    }
                    None => {
                        entities.remove(key.as_slice()).map_err(backend)?;
                    }
                }
            }
            for group in self.buffer.write_groups()? {
                let next = groups
                    .get(group.as_slice())
                    .map_err(backend)?
                    .map(|g| g.value())
                    .unwrap_or(0)
                    + 1;
                groups.insert(group.as_slice(), next).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempDb {
        path: std::path::PathBuf,
    }

    impl TempDb {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "quorum-store-{}-{}.redb",
                std::process::id(),
                name
            ));
            let _ = std::fs::remove_file(&path);
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn roundtrip_and_scan() {
        let tmp = TempDb::new("roundtrip");
        let store = RedbStore::open(&tmp.path).unwrap();
        store.put(&keys::rule_key("b1", "r1"), b"one").unwrap();
        store.put(&keys::rule_key("b1", "r2"), b"two").unwrap();
        store.put(&keys::rule_key("b2", "r1"), b"other").unwrap();

        assert_eq!(
            store.get(&keys::rule_key("b1", "r2")).unwrap(),
            Some(b"two".to_vec())
        );
        let scanned = store.prefix_scan(&keys::rule_prefix("b1")).unwrap();
        assert_eq!(scanned.len(), 2);
    }

    #[test]
    fn transaction_has_memory_semantics() {
        let tmp = TempDb::new("txn");
        let store = RedbStore::open(&tmp.path).unwrap();
        store.put(&keys::rule_key("b1", "r1"), b"old").unwrap();

        let mut txn = store.begin().unwrap();
        txn.put(&keys::rule_key("b1", "r2"), b"new").unwrap();
        assert_eq!(
            txn.get(&keys::rule_key("b1", "r2")).unwrap(),
            Some(b"new".to_vec())
        );
        // Snapshot scan: the staged write is invisible.
        assert_eq!(txn.prefix_scan(&keys::rule_prefix("b1")).unwrap().len(), 1);
        txn.commit().unwrap();
        assert_eq!(store.prefix_scan(&keys::rule_prefix("b1")).unwrap().len(), 2);
    }

    #[test]
    fn racing_write_fails_commit() {
        let tmp = TempDb::new("race");
        let store = RedbStore::open(&tmp.path).unwrap();
        store.put(&keys::blockable_key("b1"), b"v0").unwrap();

        let mut txn = store.begin().unwrap();
        let _ = txn.get(&keys::blockable_key("b1")).unwrap();
        txn.put(&keys::blockable_key("b1"), b"from-txn").unwrap();

        store.put(&keys::blockable_key("b1"), b"raced").unwrap();

        assert!(matches!(txn.commit(), Err(StoreError::Contention { .. })));
    }
}
