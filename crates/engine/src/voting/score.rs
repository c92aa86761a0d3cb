//! The score calculator: a pure tally over in-effect votes.

use quorum_types::model::Vote;

/// Sum of effective weights over a set of in-effect votes.
pub fn tally<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> i64 {
    votes.into_iter().map(Vote::effective_weight).sum()
}

/// The score a blockable will have once `new` is visible to the vote index,
/// computed from the known delta instead of a re-query.
///
/// Inside the vote transaction the freshly-written vote is not yet visible to
/// ancestor scans, so the tally cannot be recomputed there; carrying the
/// delta forward is the only correct option.
pub fn expected_score(current: i64, replaced: Option<&Vote>, new: &Vote) -> i64 {
    let mut score = current;
    if let Some(old) = replaced {
        score -= old.effective_weight();
    }
    score + new.effective_weight()
}
