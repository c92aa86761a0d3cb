//! The blockable entity: an artifact subject to a policy decision.

use crate::model::RuleKind;
use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The endpoint platform a blockable was observed on.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    MacOs,
    Windows,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::MacOs => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// The kind of identifier a blockable is keyed by.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    /// SHA-256 of the executable's contents.
    Sha256,
    /// Fingerprint of a code-signing certificate.
    CertFingerprint,
    /// Opaque bundle identifier reported by the endpoint agent.
    BundleId,
}

/// The policy state of a blockable.
///
/// Transitions between these states are owned exclusively by the voting
/// engine's state machine; nothing else may write `Blockable::state`.
#[derive(
    Encode, Decode, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockableState {
    Untrusted,
    ApprovedForLocalAllow,
    Limited,
    GloballyAllowed,
    Suspect,
    Banned,
    SilentBanned,
    Pending,
}

impl BlockableState {
    /// States in which voting is disabled for everyone, admins included.
    pub fn is_voting_prohibited(self) -> bool {
        matches!(
            self,
            BlockableState::Banned
                | BlockableState::SilentBanned
                | BlockableState::GloballyAllowed
                | BlockableState::Limited
        )
    }

    /// States that only users with admin standing may vote a blockable out of.
    pub fn is_admin_only(self) -> bool {
        matches!(self, BlockableState::Suspect | BlockableState::Pending)
    }

    /// The banned family: a blockable in one of these states must have no
    /// in-effect ALLOW rule.
    pub fn is_banned(self) -> bool {
        matches!(self, BlockableState::Banned | BlockableState::SilentBanned)
    }

    /// States in which an in-effect ALLOW rule is legitimate.
    pub fn allows_allow_rules(self) -> bool {
        matches!(
            self,
            BlockableState::ApprovedForLocalAllow | BlockableState::GloballyAllowed
        )
    }
}

impl fmt::Display for BlockableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockableState::Untrusted => "UNTRUSTED",
            BlockableState::ApprovedForLocalAllow => "APPROVED_FOR_LOCAL_ALLOW",
            BlockableState::Limited => "LIMITED",
            BlockableState::GloballyAllowed => "GLOBALLY_ALLOWED",
            BlockableState::Suspect => "SUSPECT",
            BlockableState::Banned => "BANNED",
            BlockableState::SilentBanned => "SILENT_BANNED",
            BlockableState::Pending => "PENDING",
        };
        write!(f, "{}", s)
    }
}

/// Per-kind payload of a blockable.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum BlockableKind {
    /// An executable observed on an endpoint.
    Binary {
        /// Fingerprint of the signing certificate's blockable, if signed.
        cert_id: Option<String>,
        /// The external policy service's catalog id for this file (Windows).
        file_catalog_id: Option<String>,
        /// Whether the file is currently treated as an installer (Windows).
        is_installer: bool,
        /// Whether the file is flagged as a compiler by the external service.
        is_compiler: bool,
    },
    /// A code-signing certificate.
    Certificate,
    /// A bundle of binaries voted on as a unit (macOS only).
    Package {
        /// Blockable ids of the bundle's member binaries.
        member_ids: Vec<String>,
    },
}

/// An artifact subject to a policy decision.
///
/// Created by event ingestion (outside this engine) and mutated only by the
/// voting engine or an administrative reset. The blockable entity is the
/// serialization point for all voting activity on it.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Blockable {
    /// The identifying hash / fingerprint / bundle id.
    pub id: String,
    pub id_type: IdType,
    pub platform: Platform,
    pub state: BlockableState,
    /// True while an in-effect negative vote stands unanswered.
    pub flagged: bool,
    /// Materialized social-voting score. Maintained from the known vote delta
    /// inside the vote transaction and recomputed from the in-effect votes on
    /// recount.
    pub score: i64,
    /// Monotonic counter bumped for every vote written under this blockable.
    /// Gives votes a total order independent of wall-clock resolution.
    pub vote_seq: u64,
    pub first_seen_at: UtcMicros,
    pub updated_at: UtcMicros,
    pub state_changed_at: UtcMicros,
    /// Descriptive metadata reported by the endpoint at first sighting.
    pub file_name: Option<String>,
    pub publisher: Option<String>,
    pub product_name: Option<String>,
    pub version: Option<String>,
    pub kind: BlockableKind,
}

impl Blockable {
    /// The rule kind matching this blockable's kind.
    pub fn rule_kind(&self) -> RuleKind {
        match self.kind {
            BlockableKind::Binary { .. } => RuleKind::Binary,
            BlockableKind::Certificate => RuleKind::Certificate,
            BlockableKind::Package { .. } => RuleKind::Package,
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self.kind, BlockableKind::Package { .. })
    }

    pub fn is_certificate(&self) -> bool {
        matches!(self.kind, BlockableKind::Certificate)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.kind, BlockableKind::Binary { .. })
    }

    /// The signing certificate's blockable id, if any.
    pub fn cert_id(&self) -> Option<&str> {
        match &self.kind {
            BlockableKind::Binary { cert_id, .. } => cert_id.as_deref(),
            _ => None,
        }
    }

    /// The external catalog id, if the external service has reported one.
    pub fn file_catalog_id(&self) -> Option<&str> {
        match &self.kind {
            BlockableKind::Binary {
                file_catalog_id, ..
            } => file_catalog_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_installer(&self) -> bool {
        matches!(
            self.kind,
            BlockableKind::Binary {
                is_installer: true,
                ..
            }
        )
    }

    pub fn set_installer(&mut self, value: bool) {
        if let BlockableKind::Binary { is_installer, .. } = &mut self.kind {
            *is_installer = value;
        }
    }

    /// Records a state change, stamping `state_changed_at`.
    pub fn change_state(&mut self, new_state: BlockableState, now: UtcMicros) {
        self.state = new_state;
        self.state_changed_at = now;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_families_are_disjoint_where_expected() {
        for state in [
            BlockableState::Untrusted,
            BlockableState::ApprovedForLocalAllow,
            BlockableState::Limited,
            BlockableState::GloballyAllowed,
            BlockableState::Suspect,
            BlockableState::Banned,
            BlockableState::SilentBanned,
            BlockableState::Pending,
        ] {
            if state.is_banned() {
                assert!(!state.allows_allow_rules(), "{state} allows ALLOW rules");
            }
            if state.is_admin_only() {
                assert!(!state.is_voting_prohibited(), "{state} is unreachable");
            }
        }
    }
}
