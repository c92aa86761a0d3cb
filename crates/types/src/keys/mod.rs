//! Well-known state key layout for the entity store.
//!
//! Every entity persists under a byte key of `::`-joined segments. The first
//! segment names the entity kind; the second names the **entity group root**:
//! the owning blockable for votes, rules and change sets, or the entity's own
//! id for blockables, hosts and users. Transactions validate and serialize at
//! group granularity, so everything hanging off one blockable contends on one
//! version.

/// Key prefix for blockable entities.
pub const BLOCKABLE_KEY_PREFIX: &[u8] = b"blockable::";
/// Key prefix for vote entities.
pub const VOTE_KEY_PREFIX: &[u8] = b"vote::";
/// Key prefix for rule entities.
pub const RULE_KEY_PREFIX: &[u8] = b"rule::";
/// Key prefix for rule change-set entities.
pub const CHANGE_SET_KEY_PREFIX: &[u8] = b"changeset::";
/// Key prefix for host entities.
pub const HOST_KEY_PREFIX: &[u8] = b"host::";
/// Key prefix for user entities.
pub const USER_KEY_PREFIX: &[u8] = b"user::";

/// The reserved sub-id under which the single in-effect vote for a
/// (blockable, voter) pair lives. Archived votes get a random sub-id instead.
pub const IN_EFFECT_VOTE_SUB_ID: &str = "current";

const SEP: &[u8] = b"::";

pub fn blockable_key(id: &str) -> Vec<u8> {
    [BLOCKABLE_KEY_PREFIX, id.as_bytes()].concat()
}

pub fn host_key(id: &str) -> Vec<u8> {
    [HOST_KEY_PREFIX, id.as_bytes()].concat()
}

pub fn user_key(id: &str) -> Vec<u8> {
    [USER_KEY_PREFIX, id.as_bytes()].concat()
}

/// Key of a specific vote: `vote::{blockable}::{user}::{sub}`.
pub fn vote_key(blockable_id: &str, user_id: &str, sub_id: &str) -> Vec<u8> {
    [
        VOTE_KEY_PREFIX,
        blockable_id.as_bytes(),
        SEP,
        user_id.as_bytes(),
        SEP,
        sub_id.as_bytes(),
    ]
    .concat()
}

/// Key of the in-effect vote for a (blockable, voter) pair.
pub fn in_effect_vote_key(blockable_id: &str, user_id: &str) -> Vec<u8> {
    vote_key(blockable_id, user_id, IN_EFFECT_VOTE_SUB_ID)
}

/// Prefix covering every vote anchored under a blockable.
pub fn vote_prefix(blockable_id: &str) -> Vec<u8> {
    [VOTE_KEY_PREFIX, blockable_id.as_bytes(), SEP].concat()
}

/// Key of a rule under its parent blockable: `rule::{blockable}::{sub}`.
pub fn rule_key(blockable_id: &str, sub_id: &str) -> Vec<u8> {
    [
        RULE_KEY_PREFIX,
        blockable_id.as_bytes(),
        SEP,
        sub_id.as_bytes(),
    ]
    .concat()
}

/// Prefix covering every rule anchored under a blockable.
pub fn rule_prefix(blockable_id: &str) -> Vec<u8> {
    [RULE_KEY_PREFIX, blockable_id.as_bytes(), SEP].concat()
}

/// Key of a change set under its parent blockable.
pub fn change_set_key(blockable_id: &str, sub_id: &str) -> Vec<u8> {
    [
        CHANGE_SET_KEY_PREFIX,
        blockable_id.as_bytes(),
        SEP,
        sub_id.as_bytes(),
    ]
    .concat()
}

/// Prefix covering every change set anchored under a blockable.
pub fn change_set_prefix(blockable_id: &str) -> Vec<u8> {
    [CHANGE_SET_KEY_PREFIX, blockable_id.as_bytes(), SEP].concat()
}

/// Whether a vote key addresses the in-effect slot rather than an archived
/// copy.
pub fn is_in_effect_vote_key(key: &[u8]) -> bool {
    key.starts_with(VOTE_KEY_PREFIX)
        && key.ends_with(&[SEP, IN_EFFECT_VOTE_SUB_ID.as_bytes()].concat())
}

/// Extracts the entity-group root of a key: its second `::` segment.
///
/// Returns `None` for keys that do not follow the layout above.
pub fn group_of(key: &[u8]) -> Option<&[u8]> {
    let mut segments = split_segments(key);
    segments.next()?;
    segments.next()
}

fn split_segments(key: &[u8]) -> impl Iterator<Item = &[u8]> {
    // Keys are short; a simple windowed split keeps this allocation-free.
    let mut rest = key;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.windows(2).position(|w| w == SEP) {
            Some(i) => {
                let (seg, tail) = rest.split_at(i);
                rest = &tail[2..];
                Some(seg)
            }
            None => {
                let seg = rest;
                rest = &[];
                Some(seg)
            }
        }
    })
}
