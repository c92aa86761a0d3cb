//! The rule change-set entity: a durable batch of rule mutations awaiting
//! commit against the external policy service (Windows only).

use crate::model::RulePolicy;
use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A batch of rules created together that must be pushed to the external
/// policy service as a unit.
///
/// Created in the same transaction as its rules and deleted once the
/// committer has applied every one of them. Rules are referenced by their
/// sub-id under the shared parent blockable.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RuleChangeSet {
    /// Random sub-id of this change set under its parent blockable.
    pub id: String,
    /// Sub-ids of the rules this change carries.
    pub rule_ids: Vec<String>,
    /// The policy the batch asserts. Mirrors the rules' policy.
    pub change_type: RulePolicy,
    pub created_at: UtcMicros,
}
