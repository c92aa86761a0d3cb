//! Random sub-id generation for archived votes, rules and change sets.

use rand::RngCore;

/// A fresh 16-hex-char sub-id. Distinct from the reserved in-effect vote
/// sub-id by construction.
pub(crate) fn random_sub_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
