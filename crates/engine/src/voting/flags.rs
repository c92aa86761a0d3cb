//! The flag auditor: re-derives a blockable's `flagged` bit from its
//! in-effect votes.

use quorum_api::store::{get_typed, scan_typed, StoreTxn};
use quorum_types::error::StoreError;
use quorum_types::keys;
use quorum_types::model::{Blockable, Capabilities, User, Vote};

/// The in-effect votes under a blockable, newest first.
///
/// Served from the transaction snapshot: a vote written earlier in the same
/// transaction is intentionally not visible here, exactly as the backing
/// index would behave.
pub(crate) fn in_effect_votes(
    txn: &mut dyn StoreTxn,
    blockable_id: &str,
) -> Result<Vec<Vote>, StoreError> {
    let mut votes: Vec<Vote> = scan_typed(txn, &keys::vote_prefix(blockable_id))?
        .into_iter()
        .filter(|(key, _)| keys::is_in_effect_vote_key(key))
        .map(|(_, vote)| vote)
        .collect();
    votes.sort_by(|a, b| b.seq.cmp(&a.seq));
    Ok(votes)
}

/// Checks the flagged property of a blockable and fixes it if needed.
/// Returns whether the blockable was mutated.
///
/// A blockable with an in-effect negative vote must be flagged unless the
/// most recent vote by a user who may unflag is positive; a blockable with no
/// negative votes must not be flagged.
pub fn check_flag_status(
    txn: &mut dyn StoreTxn,
    blockable: &mut Blockable,
) -> Result<bool, StoreError> {
    let votes = in_effect_votes(txn, &blockable.id)?;
    let down_votes_exist = votes.iter().any(|v| !v.was_yes);

    if down_votes_exist && !blockable.flagged {
        // Walk newest to oldest looking for a positive vote from a user who
        // may unflag; an older negative vote past that point is answered.
        for vote in &votes {
            if vote.was_yes {
                let user: Option<User> = get_typed(txn, &keys::user_key(&vote.user_id))?;
                if user.is_some_and(|u| u.has_capability(Capabilities::UNFLAG)) {
                    return Ok(false);
                }
            } else {
                tracing::info!(
                    blockable = %blockable.id,
                    "blockable should have been flagged, but was not"
                );
                blockable.flagged = true;
                return Ok(true);
            }
        }
        Ok(false)
    } else if !down_votes_exist && blockable.flagged {
        tracing::info!(blockable = %blockable.id, "blockable was flagged, but should not be");
        blockable.flagged = false;
        Ok(true)
    } else {
        Ok(false)
    }
}
