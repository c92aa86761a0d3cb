//! The rule entity: a concrete allow/deny decision enforced by endpoints.

use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of artifact a rule applies to.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Binary,
    Certificate,
    Package,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Binary => write!(f, "binary"),
            RuleKind::Certificate => write!(f, "certificate"),
            RuleKind::Package => write!(f, "package"),
        }
    }
}

/// The assertion a rule makes.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RulePolicy {
    Allow,
    Deny,
    /// Undo all prior policy for the target on the affected endpoints.
    Remove,
    ForceInstaller,
    ForceNotInstaller,
}

impl RulePolicy {
    /// Whether this policy belongs to the installer-state pipeline rather than
    /// the voting pipeline.
    pub fn is_installer_policy(self) -> bool {
        matches!(self, RulePolicy::ForceInstaller | RulePolicy::ForceNotInstaller)
    }
}

impl fmt::Display for RulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RulePolicy::Allow => "ALLOW",
            RulePolicy::Deny => "DENY",
            RulePolicy::Remove => "REMOVE",
            RulePolicy::ForceInstaller => "FORCE_INSTALLER",
            RulePolicy::ForceNotInstaller => "FORCE_NOT_INSTALLER",
        };
        write!(f, "{}", s)
    }
}

/// A rule generated from voting or installer-policy changes.
///
/// A superseded rule is disabled in place (`in_effect = false`), never
/// deleted, so its key stays stable for change sets that reference it.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Sub-id of this rule under its parent blockable.
    pub id: String,
    pub kind: RuleKind,
    pub policy: RulePolicy,
    pub in_effect: bool,
    /// The targeted endpoint, or empty for a fleet-wide rule.
    pub host_id: String,
    /// For locally-scoped rules, the user the rule was created for.
    pub user_id: Option<String>,
    /// Whether the external policy service has acknowledged this rule
    /// (Windows only; the committer's idempotency token).
    pub is_committed: bool,
    /// Whether the commit actually took effect on the endpoint, once known.
    pub is_fulfilled: Option<bool>,
    pub created_at: UtcMicros,
    pub updated_at: UtcMicros,
}

impl Rule {
    pub fn is_local(&self) -> bool {
        !self.host_id.is_empty()
    }

    pub fn mark_disabled(&mut self, now: UtcMicros) {
        self.in_effect = false;
        self.updated_at = now;
    }
}
