#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! Entity-store backends implementing [`quorum_api::store::EntityStore`].
//!
//! Two backends share the same transaction machinery:
//! - [`MemoryStore`]: a lock-protected B-tree, for tests and development;
//! - [`RedbStore`]: a single-file `redb` database, for real deployments.
//!
//! Both take a full snapshot view at `begin`, buffer writes privately, and
//! validate at commit against per-entity-group versions, retrying callers on
//! contention. Scans inside a transaction are served from the snapshot only,
//! mirroring the index lag of the hierarchical datastore the engine was
//! designed against.

mod memory;
mod redb_store;
mod txn;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;
