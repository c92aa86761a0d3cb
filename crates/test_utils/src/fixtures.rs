//! Entity fixtures seeding the in-memory store.

use quorum_api::store::store_typed;
use quorum_store::MemoryStore;
use quorum_types::keys;
use quorum_types::model::{
    Blockable, BlockableKind, BlockableState, Capabilities, Host, HostKind, IdType, Platform,
    User,
};
use quorum_types::time::now_micros;

pub fn store() -> MemoryStore {
    MemoryStore::new()
}

/// A regular voter: may flag, nothing more.
pub fn user(id: &str, vote_weight: u32) -> User {
    User {
        id: id.to_string(),
        vote_weight,
        is_admin: false,
        capabilities: Capabilities::FLAG,
        recorded_at: now_micros(),
    }
}

/// A fully-capable administrator with the conventional admin vote weight.
pub fn admin(id: &str) -> User {
    User {
        id: id.to_string(),
        vote_weight: 25,
        is_admin: true,
        capabilities: Capabilities::all(),
        recorded_at: now_micros(),
    }
}

pub fn seed_user(store: &MemoryStore, user: &User) {
    store_typed(store, &keys::user_key(&user.id), user).expect("seed user");
}

fn blockable(id: &str, platform: Platform, id_type: IdType, kind: BlockableKind) -> Blockable {
    let now = now_micros();
    Blockable {
        id: id.to_string(),
        id_type,
        platform,
        state: BlockableState::Untrusted,
        flagged: false,
        score: 0,
        vote_seq: 0,
        first_seen_at: now,
        updated_at: now,
        state_changed_at: now,
        file_name: Some(format!("{id}.bin")),
        publisher: None,
        product_name: None,
        version: None,
        kind,
    }
}

pub fn macos_binary(id: &str) -> Blockable {
    blockable(
        id,
        Platform::MacOs,
        IdType::Sha256,
        BlockableKind::Binary {
            cert_id: None,
            file_catalog_id: None,
            is_installer: false,
            is_compiler: false,
        },
    )
}

pub fn windows_binary(id: &str, file_catalog_id: &str) -> Blockable {
    blockable(
        id,
        Platform::Windows,
        IdType::Sha256,
        BlockableKind::Binary {
            cert_id: None,
            file_catalog_id: Some(file_catalog_id.to_string()),
            is_installer: false,
            is_compiler: false,
        },
    )
}

pub fn certificate(id: &str, platform: Platform) -> Blockable {
    blockable(
        id,
        platform,
        IdType::CertFingerprint,
        BlockableKind::Certificate,
    )
}

pub fn package(id: &str, member_ids: &[&str]) -> Blockable {
    blockable(
        id,
        Platform::MacOs,
        IdType::BundleId,
        BlockableKind::Package {
            member_ids: member_ids.iter().map(|m| m.to_string()).collect(),
        },
    )
}

pub fn seed_blockable(store: &MemoryStore, blockable: &Blockable) {
    store_typed(store, &keys::blockable_key(&blockable.id), blockable).expect("seed blockable");
}

pub fn seed_macos_host(store: &MemoryStore, id: &str, primary_user: &str) {
    let host = Host {
        id: id.to_string(),
        hostname: format!("{id}.corp.example.com"),
        recorded_at: now_micros(),
        hidden: false,
        kind: HostKind::MacOs {
            primary_user: primary_user.to_string(),
            transitive_allowlisting: false,
        },
    };
    store_typed(store, &keys::host_key(id), &host).expect("seed host");
}

pub fn seed_windows_host(store: &MemoryStore, id: &str, users: &[&str]) {
    let host = Host {
        id: id.to_string(),
        hostname: format!("{id}.corp.example.com"),
        recorded_at: now_micros(),
        hidden: false,
        kind: HostKind::Windows {
            users: users.iter().map(|u| u.to_string()).collect(),
            policy_id: None,
        },
    };
    store_typed(store, &keys::host_key(id), &host).expect("seed host");
}
