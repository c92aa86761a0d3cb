//! The entity-store abstraction: typed, transactional access to the
//! hierarchical key-value store.
//!
//! # Transaction semantics
//!
//! A [`StoreTxn`] is a snapshot of the store taken at `begin` plus a private
//! write buffer. Point reads (`get`) see the transaction's own writes;
//! **prefix scans do not** — they are served from the snapshot alone, the way
//! a secondary index that has not caught up with the transaction's writes
//! would behave. Engine code that writes an entity and needs it counted must
//! therefore carry the delta forward itself instead of re-scanning.
//!
//! Commits validate optimistically at entity-group granularity: if any group
//! touched by the transaction was committed to since the snapshot was taken,
//! the commit fails with contention and [`run_in_transaction`] retries the
//! whole closure against a fresh snapshot. A transaction may touch at most
//! [`MAX_GROUPS_PER_TXN`] distinct groups.

use parity_scale_codec::{Decode, Encode};
use quorum_types::codec;
use quorum_types::error::StoreError;

/// An owned key-value pair returned by scans.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Upper bound on distinct entity groups one transaction may touch.
pub const MAX_GROUPS_PER_TXN: usize = 25;

/// Untyped access to the entity store outside of any transaction.
///
/// Non-transactional reads observe the latest committed state. Writes commit
/// immediately as single-entity transactions.
pub trait EntityStore: Send + Sync {
    /// Gets a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a key-value pair, committing immediately.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Deletes a key, committing immediately.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Returns every key-value pair whose key starts with `prefix`, in key
    /// order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError>;

    /// Opens a transaction against a snapshot of the current state.
    fn begin(&self) -> Result<Box<dyn StoreTxn + '_>, StoreError>;
}

/// A read-modify-write transaction over up to [`MAX_GROUPS_PER_TXN`] entity
/// groups.
pub trait StoreTxn {
    /// Gets a value by key. Sees this transaction's own writes.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Buffers a write.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Buffers a deletion.
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Scans the **snapshot** for keys starting with `prefix`. Writes made
    /// inside this transaction are not visible to the scan (stale-index
    /// semantics; see the module docs).
    fn prefix_scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>, StoreError>;

    /// Validates and applies the write buffer. Fails with
    /// [`StoreError::Contention`] if any touched group changed underneath the
    /// snapshot.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Runs `body` inside a transaction, retrying on optimistic-concurrency
/// conflicts up to `max_attempts` times.
///
/// The closure must be idempotent: it may run several times, and it must
/// re-read any state it depends on through the transaction it is handed.
/// Side effects that cannot roll back (task enqueues, analytics flushes)
/// belong in the closure's return value, to be performed by the caller only
/// after this function returns successfully.
pub fn run_in_transaction<T, E>(
    store: &dyn EntityStore,
    max_attempts: u32,
    mut body: impl FnMut(&mut dyn StoreTxn) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let mut txn = store.begin().map_err(E::from)?;
        let value = body(txn.as_mut())?;
        match txn.commit() {
            Ok(()) => return Ok(value),
            Err(StoreError::Contention { .. }) if attempt < attempts => {
                tracing::debug!(attempt, "transaction contention, retrying");
            }
            Err(StoreError::Contention { .. }) => {
                return Err(E::from(StoreError::Contention { attempts }));
            }
            Err(other) => return Err(E::from(other)),
        }
    }
    unreachable!("transaction retry loop always returns")
}

/// Decodes a stored entity, mapping codec failures onto [`StoreError`].
pub fn decode_entity<T: Decode>(bytes: &[u8]) -> Result<T, StoreError> {
    codec::from_bytes_canonical(bytes).map_err(StoreError::Decode)
}

/// Typed point read within a transaction.
pub fn get_typed<T: Decode>(
    txn: &mut dyn StoreTxn,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    txn.get(key)?.map(|b| decode_entity(&b)).transpose()
}

/// Typed write within a transaction.
pub fn put_typed<T: Encode>(
    txn: &mut dyn StoreTxn,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    txn.put(key, &codec::to_bytes_canonical(value))
}

/// Typed snapshot scan within a transaction.
pub fn scan_typed<T: Decode>(
    txn: &mut dyn StoreTxn,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, T)>, StoreError> {
    txn.prefix_scan(prefix)?
        .into_iter()
        .map(|(k, v)| Ok((k, decode_entity(&v)?)))
        .collect()
}

/// Typed point read outside a transaction.
pub fn fetch_typed<T: Decode>(
    store: &dyn EntityStore,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    store.get(key)?.map(|b| decode_entity(&b)).transpose()
}

/// Typed write outside a transaction.
pub fn store_typed<T: Encode>(
    store: &dyn EntityStore,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    store.put(key, &codec::to_bytes_canonical(value))
}

/// Typed scan outside a transaction.
pub fn fetch_scan_typed<T: Decode>(
    store: &dyn EntityStore,
    prefix: &[u8],
) -> Result<Vec<(Vec<u8>, T)>, StoreError> {
    store
        .prefix_scan(prefix)?
        .into_iter()
        .map(|(k, v)| Ok((k, decode_entity(&v)?)))
        .collect()
}
