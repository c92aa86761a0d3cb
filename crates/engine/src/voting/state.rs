//! The threshold side of the blockable state machine.
//!
//! Privileged overrides (MARK_MALWARE forcing SUSPECT, admin-only gating) are
//! applied by the ballot box around this evaluation; this module only maps a
//! score onto the state the thresholds call for.

use quorum_types::config::VotingThresholds;
use quorum_types::model::BlockableState;

/// The state a blockable's score alone calls for.
pub fn evaluate(score: i64, thresholds: &VotingThresholds) -> BlockableState {
    if score >= thresholds.globally_allowed {
        BlockableState::GloballyAllowed
    } else if thresholds
        .locally_allowed
        .is_some_and(|local| score >= local)
    {
        BlockableState::ApprovedForLocalAllow
    } else if score <= thresholds.banned {
        BlockableState::Banned
    } else {
        BlockableState::Untrusted
    }
}
