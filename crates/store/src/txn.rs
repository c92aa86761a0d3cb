//! Transaction bookkeeping shared by both store backends.

use ahash::AHashMap;
use quorum_api::store::MAX_GROUPS_PER_TXN;
use quorum_types::error::StoreError;
use quorum_types::keys;
use std::collections::BTreeMap;

/// Private write buffer plus the optimistic read-set of a transaction.
///
/// Every key access (read or write) records the version of the key's entity
/// group as of the snapshot; commit-time validation compares those against
/// the live versions.
#[derive(Default)]
pub(crate) struct TxnBuffer {
    /// Buffered mutations; `None` is a deletion.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Entity-group versions observed at first touch.
    observed: AHashMap<Vec<u8>, u64>,
}

impl TxnBuffer {
    /// Records that `key`'s group is part of this transaction, fetching its
    /// snapshot version through `version_of` on first touch.
    pub(crate) fn touch(
        &mut self,
        key: &[u8],
        version_of: impl FnOnce(&[u8]) -> Result<u64, StoreError>,
    ) -> Result<(), StoreError> {
        let group = group_root(key)?;
        if self.observed.contains_key(&group) {
            return Ok(());
        }
        if self.observed.len() >= MAX_GROUPS_PER_TXN {
            return Err(StoreError::TooManyGroups {
                limit: MAX_GROUPS_PER_TXN,
                got: self.observed.len() + 1,
            });
        }
        let version = version_of(&group)?;
        self.observed.insert(group, version);
        Ok(())
    }

    /// The group a scan prefix is anchored under. Kind-wide scans have no
    /// group and are rejected: non-ancestor queries do not belong inside a
    /// transaction.
    pub(crate) fn scan_group(prefix: &[u8]) -> Result<Vec<u8>, StoreError> {
        group_root(prefix)
    }

    pub(crate) fn stage_put(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn stage_delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    /// The buffered value for `key`, if this transaction wrote it.
    pub(crate) fn overlay(&self, key: &[u8]) -> Option<Option<&Vec<u8>>> {
        self.writes.get(key).map(Option::as_ref)
    }

    pub(crate) fn observed(&self) -> impl Iterator<Item = (&Vec<u8>, u64)> {
        self.observed.iter().map(|(g, v)| (g, *v))
    }

    pub(crate) fn writes(&self) -> impl Iterator<Item = (&Vec<u8>, Option<&Vec<u8>>)> {
        self.writes.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Distinct groups receiving writes, whose versions must be bumped.
    pub(crate) fn write_groups(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut groups: Vec<Vec<u8>> = Vec::new();
        for key in self.writes.keys() {
            let group = group_root(key)?;
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        Ok(groups)
    }
}

fn group_root(key: &[u8]) -> Result<Vec<u8>, StoreError> {
    match keys::group_of(key) {
        Some(group) if !group.is_empty() => Ok(group.to_vec()),
        _ => Err(StoreError::Backend(format!(
            "key {:?} has no entity group",
            String::from_utf8_lossy(key)
        ))),
    }
}
