//! The host entity: a managed endpoint running one of the agents.

use crate::model::Platform;
use crate::time::UtcMicros;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Platform-specific host payload.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum HostKind {
    MacOs {
        /// Short name of the user this machine belongs to. Locally-scoped
        /// allow rules for that user target this host.
        primary_user: String,
        /// Whether the agent extends trust transitively to files written by
        /// allowed compilers.
        transitive_allowlisting: bool,
    },
    Windows {
        /// Short names of every user associated with this machine.
        users: Vec<String>,
        /// The external policy service's policy assignment, if any.
        policy_id: Option<String>,
    },
}

/// A device that has interacted with the policy service.
///
/// The engine only ever reads hosts, and only to answer the host-selection
/// question for locally-scoped rules.
#[derive(Encode, Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Device UUID reported by the agent, normalized to upper case.
    pub id: String,
    pub hostname: String,
    pub recorded_at: UtcMicros,
    /// Hidden hosts are excluded from user-facing listings but still receive
    /// rules.
    pub hidden: bool,
    pub kind: HostKind,
}

impl Host {
    pub fn platform(&self) -> Platform {
        match self.kind {
            HostKind::MacOs { .. } => Platform::MacOs,
            HostKind::Windows { .. } => Platform::Windows,
        }
    }

    /// Whether the given user short name is associated with this host.
    pub fn is_associated_with(&self, username: &str) -> bool {
        match &self.kind {
            HostKind::MacOs { primary_user, .. } => primary_user == username,
            HostKind::Windows { users, .. } => users.iter().any(|u| u == username),
        }
    }

    pub fn normalize_id(host_id: &str) -> String {
        host_id.to_uppercase()
    }
}
