//! The vote entity.

use crate::model::RuleKind;
use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A single vote cast by a user on a blockable.
///
/// At most one vote per (blockable, voter) is in effect at a time; it lives
/// under the reserved `current` sub-id (see [`crate::keys`]). A replaced or
/// reset vote is re-keyed to a random archived sub-id rather than deleted, so
/// audit reads still see the full history.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    /// Email of the voting user at the time of the vote.
    pub user_id: String,
    /// True if the vote was a "yes".
    pub was_yes: bool,
    /// The voter's weight at the time of the vote. Never negative.
    pub weight: u32,
    /// Position in the blockable's total vote order (`Blockable::vote_seq`).
    pub seq: u64,
    pub recorded_at: UtcMicros,
    /// The kind of blockable voted on.
    pub candidate_type: RuleKind,
}

impl Vote {
    /// The vote's contribution to the blockable score: `+weight` for a yes,
    /// `-weight` for a no.
    pub fn effective_weight(&self) -> i64 {
        if self.was_yes {
            i64::from(self.weight)
        } else {
            -i64::from(self.weight)
        }
    }
}
