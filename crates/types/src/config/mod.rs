//! Configuration structures for the voting engine and its collaborators.

use crate::model::{Platform, RuleKind};
use serde::{Deserialize, Serialize};

/// Score thresholds driving the blockable state machine.
///
/// Invariant: `banned < 0 < locally_allowed < globally_allowed`. The local
/// threshold is optional; deployments that only want fleet-wide decisions
/// leave it unset and the local-allow state is never entered by score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VotingThresholds {
    /// At or below this score a blockable is banned.
    pub banned: i64,
    /// At or above this score a blockable becomes locally allowable.
    pub locally_allowed: Option<i64>,
    /// At or above this score a blockable is allowed fleet-wide.
    pub globally_allowed: i64,
}

impl Default for VotingThresholds {
    fn default() -> Self {
        Self {
            banned: -26,
            locally_allowed: Some(15),
            globally_allowed: 50,
        }
    }
}

/// Parameters of the voting pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingConfig {
    pub thresholds: VotingThresholds,
    /// Weight used when a vote request does not carry an explicit weight.
    pub default_vote_weight: u32,
    /// Optimistic-concurrency retry budget for engine transactions.
    pub max_transaction_attempts: u32,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            thresholds: VotingThresholds::default(),
            default_vote_weight: 1,
            max_transaction_attempts: 4,
        }
    }
}

/// When a local rule cannot be applied because the file is absent from the
/// endpoint, these bounds decide whether the endpoint is healthy enough to
/// treat the rule as committed-but-unfulfilled rather than retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostHealthConfig {
    /// Maximum age of the endpoint's last poll, in seconds.
    pub max_poll_age_secs: u64,
    /// Minimum file-sync completion percentage.
    pub min_sync_percent: u32,
}

impl Default for HostHealthConfig {
    fn default() -> Self {
        Self {
            max_poll_age_secs: 5_400, // 90 minutes
            min_sync_percent: 90,
        }
    }
}

/// Parameters of the Windows change-set committer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitterConfig {
    /// Base URL of the external policy service's REST API.
    pub endpoint: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never appears in configuration files.
    pub api_key_env: String,
    pub health: HostHealthConfig,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://policy.invalid/api/bit9platform/v1".to_string(),
            api_key_env: "QUORUM_POLICY_API_KEY".to_string(),
            health: HostHealthConfig::default(),
        }
    }
}

/// A rule that must always exist and be in effect, created at startup with no
/// parent vote. Protects platform-critical binaries from ever being blocked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriticalRuleSpec {
    /// Id of the blockable the rule anchors under.
    pub blockable_id: String,
    pub platform: Platform,
    pub kind: RuleKind,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub voting: VotingConfig,
    pub committer: CommitterConfig,
    pub critical_rules: Vec<CriticalRuleSpec>,
}
