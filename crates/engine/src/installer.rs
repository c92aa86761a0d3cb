//! The installer-policy subsystem: a rule pipeline independent of voting.
//!
//! A binary's installer state decides whether files it writes are trusted
//! transitively by the external policy service. Only the Windows pipeline has
//! this concept.

use crate::ids::random_sub_id;
use crate::rows;
use crate::voting::{Effects, VotingEngine};
use quorum_api::store::{fetch_scan_typed, get_typed, put_typed, run_in_transaction, scan_typed};
use quorum_telemetry::analytics::BlockAction;
use quorum_types::error::{InstallerError, VoteError};
use quorum_types::keys;
use quorum_types::model::{Blockable, Platform, Rule, RuleChangeSet, RulePolicy};
use quorum_types::time::now_micros;
use quorum_types::ErrorCode;

struct InstallerOutcome {
    is_installer: bool,
    effects: Effects,
}

impl VotingEngine {
    /// Sets a Windows binary's installer policy, replacing any in-effect
    /// installer rule of the opposite polarity and queueing the change for
    /// commit. Returns the binary's resulting installer flag.
    pub async fn set_installer_policy(
        &self,
        actor_id: &str,
        blockable_id: &str,
        policy: RulePolicy,
    ) -> Result<bool, InstallerError> {
        let result = self
            .set_installer_policy_inner(actor_id, blockable_id, policy)
            .await;
        if let Err(e) = &result {
            quorum_telemetry::error_metrics().inc_error("installer", e.code());
        }
        result
    }

    async fn set_installer_policy_inner(
        &self,
        actor_id: &str,
        blockable_id: &str,
        policy: RulePolicy,
    ) -> Result<bool, InstallerError> {
        if !policy.is_installer_policy() {
            return Err(InstallerError::NotInstallerPolicy(policy.to_string()));
        }
        let blockable = self
            .load_blockable(blockable_id)
            .map_err(|e| match e {
                VoteError::BlockableNotFound(id) => InstallerError::BlockableNotFound(id),
                VoteError::Store(s) => InstallerError::Store(s),
                other => InstallerError::BlockableNotFound(other.to_string()),
            })?;
        if blockable.platform != Platform::Windows {
            return Err(InstallerError::BadPlatform(blockable.platform));
        }
        if !blockable.is_binary() {
            return Err(InstallerError::NotBinary(blockable_id.to_string()));
        }
        let flavor = self
            .flavor(blockable.platform)
            .map_err(|_| InstallerError::BadPlatform(blockable.platform))?;

        let attempts = self.config.voting.max_transaction_attempts;
        let outcome = run_in_transaction(self.store.as_ref(), attempts, |txn| {
            let mut blockable: Blockable = get_typed(txn, &keys::blockable_key(blockable_id))?
                .ok_or_else(|| InstallerError::BlockableNotFound(blockable_id.to_string()))?;
            let now = now_micros();
            let mut effects = Effects::default();

            // At most one installer rule is in effect at a time.
            let existing: Option<(Vec<u8>, Rule)> =
                scan_typed::<Rule>(txn, &keys::rule_prefix(blockable_id))?
                    .into_iter()
                    .find(|(_, rule)| rule.in_effect && rule.policy.is_installer_policy());
            if let Some((key, mut rule)) = existing {
                if rule.policy == policy {
                    // Same policy already queued or applied; nothing to do.
                    return Ok(InstallerOutcome {
                        is_installer: blockable.is_installer(),
                        effects,
                    });
                }
                rule.mark_disabled(now);
                txn.put(&key, &quorum_types::codec::to_bytes_canonical(&rule))?;
            }

            let new_rule = Rule {
                id: random_sub_id(),
                kind: blockable.rule_kind(),
                policy,
                in_effect: true,
                host_id: String::new(),
                user_id: None,
                is_committed: false,
                is_fulfilled: None,
                created_at: now,
                updated_at: now,
            };
            put_typed(txn, &keys::rule_key(blockable_id, &new_rule.id), &new_rule)?;
            effects.rows.push(rows::rule_row(&blockable, &new_rule, now));

            let change = RuleChangeSet {
                id: random_sub_id(),
                rule_ids: vec![new_rule.id.clone()],
                change_type: policy,
                created_at: now,
            };
            put_typed(
                txn,
                &keys::change_set_key(blockable_id, &change.id),
                &change,
            )?;
            effects.trigger_commit = flavor.emits_change_sets;

            let is_installer = policy == RulePolicy::ForceInstaller;
            blockable.set_installer(is_installer);
            blockable.updated_at = now;
            effects.rows.push(rows::blockable_row(
                &blockable,
                BlockAction::Comment,
                now,
                Some(format!("User {actor_id} changed installer state to {policy}")),
            ));
            put_typed(txn, &keys::blockable_key(blockable_id), &blockable)?;

            Ok::<_, InstallerError>(InstallerOutcome {
                is_installer,
                effects,
            })
        })?;

        let trigger_commit = outcome.effects.trigger_commit;
        self.flush(outcome.effects);
        if trigger_commit {
            self.schedule_commit(blockable_id).await;
        }
        Ok(outcome.is_installer)
    }

    /// Whether an installer-policy rule for this blockable is still waiting
    /// on the external commit worker. Installer rules are always global, so
    /// the answer is actor-independent.
    pub fn has_pending_installer_change(
        &self,
        blockable_id: &str,
    ) -> Result<bool, InstallerError> {
        let rules: Vec<(Vec<u8>, Rule)> =
            fetch_scan_typed(self.store.as_ref(), &keys::rule_prefix(blockable_id))?;
        Ok(rules.into_iter().any(|(_, rule)| {
            rule.in_effect && !rule.is_committed && rule.policy.is_installer_policy()
        }))
    }
}
