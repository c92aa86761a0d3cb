//! Host selection: which endpoints a locally-scoped allow rule must target
//! for a given voter.
//!
//! These are non-ancestor scans over the host kind and therefore must never
//! run inside the voting transaction; the engine runs them between the vote
//! transaction and the local-rule transaction.

use quorum_api::store::{fetch_scan_typed, EntityStore};
use quorum_types::error::StoreError;
use quorum_types::keys::HOST_KEY_PREFIX;
use quorum_types::model::{Host, Platform, User};
use std::collections::BTreeSet;

/// A strategy answering "which hosts should a local rule for this user cover".
pub trait HostSelector: Send + Sync {
    fn hosts_for_user(
        &self,
        store: &dyn EntityStore,
        user: &User,
    ) -> Result<BTreeSet<String>, StoreError>;
}

fn matching_hosts(
    store: &dyn EntityStore,
    platform: Platform,
    username: &str,
) -> Result<BTreeSet<String>, StoreError> {
    let hosts: Vec<(Vec<u8>, Host)> = fetch_scan_typed(store, HOST_KEY_PREFIX)?;
    Ok(hosts
        .into_iter()
        .map(|(_, host)| host)
        .filter(|host| host.platform() == platform && host.is_associated_with(username))
        .map(|host| host.id)
        .collect())
}

/// macOS policy: a user's rules land on the hosts where they are the primary
/// user.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryUserSelector;

impl HostSelector for PrimaryUserSelector {
    fn hosts_for_user(
        &self,
        store: &dyn EntityStore,
        user: &User,
    ) -> Result<BTreeSet<String>, StoreError> {
        matching_hosts(store, Platform::MacOs, user.short_name())
    }
}

/// Windows policy: a user's rules land on every host whose users list names
/// them.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignedUsersSelector;

impl HostSelector for AssignedUsersSelector {
    fn hosts_for_user(
        &self,
        store: &dyn EntityStore,
        user: &User,
    ) -> Result<BTreeSet<String>, StoreError> {
        matching_hosts(store, Platform::Windows, user.short_name())
    }
}
