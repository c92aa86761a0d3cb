//! The ballot box orchestrator: the `Vote`, `Recount` and `Reset` entry
//! points.
//!
//! Each entry point does its fail-fast validation outside the transaction,
//! runs the state mutation inside one optimistic cross-group transaction, and
//! externalizes irreversible side effects (analytics rows, commit triggers,
//! local-rule creation) only after the commit has succeeded.

pub mod flags;
pub mod hosts;
pub mod rules;
pub mod score;
pub mod state;

#[cfg(test)]
mod tests;

use crate::ids::random_sub_id;
use crate::platform::PlatformFlavor;
use crate::rows;
use async_trait::async_trait;
use parity_scale_codec::{Decode, Encode};
use quorum_api::store::{
    fetch_typed, get_typed, put_typed, run_in_transaction, EntityStore, StoreTxn,
};
use quorum_api::tasks::{TaskHandler, TaskQueue};
use quorum_telemetry::analytics::{AnalyticsRow, AnalyticsSink, BlockAction};
use quorum_telemetry::sinks::voting_metrics;
use quorum_telemetry::time::VoteTimer;
use quorum_types::config::EngineConfig;
use quorum_types::error::{ProhibitedReason, StoreError, TaskError, VoteError};
use quorum_types::keys;
use quorum_types::model::{
    Blockable, BlockableKind, BlockableState, Capabilities, Platform, Rule, RuleChangeSet,
    RulePolicy, User, Vote,
};
use quorum_types::queues::{COMMIT_CHANGES_QUEUE, LOCAL_RULES_QUEUE};
use quorum_types::time::{now_micros, UtcMicros};
use quorum_types::ErrorCode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Side effects buffered during a transaction and performed only after its
/// commit succeeds.
#[derive(Default)]
pub(crate) struct Effects {
    pub(crate) rows: Vec<AnalyticsRow>,
    /// A change set was written; the committer must be scheduled.
    pub(crate) trigger_commit: bool,
}

struct VoteOutcome {
    vote: Vote,
    blockable: Blockable,
    prev_score: i64,
    prev_state: BlockableState,
    effects: Effects,
}

struct RecountOutcome {
    changed: bool,
    effects: Effects,
}

/// Payload of a deferred local-rule creation retry.
#[derive(Encode, Decode)]
struct LocalRulesTask {
    blockable_id: String,
    /// `None` re-derives the full upvoter set.
    user_ids: Option<Vec<String>>,
}

/// The voting engine. One instance serves every platform it has a
/// [`PlatformFlavor`] for.
pub struct VotingEngine {
    pub(crate) store: Arc<dyn EntityStore>,
    pub(crate) tasks: Arc<dyn TaskQueue>,
    pub(crate) analytics: Arc<dyn AnalyticsSink>,
    pub(crate) config: EngineConfig,
    pub(crate) flavors: BTreeMap<Platform, PlatformFlavor>,
}

impl VotingEngine {
    /// An engine managing the standard macOS + Windows deployment.
    pub fn new(
        store: Arc<dyn EntityStore>,
        tasks: Arc<dyn TaskQueue>,
        analytics: Arc<dyn AnalyticsSink>,
        config: EngineConfig,
    ) -> Self {
        Self::with_flavors(store, tasks, analytics, config, PlatformFlavor::standard())
    }

    /// An engine managing only the given platforms; blockables from any other
    /// platform are rejected as unsupported.
    pub fn with_flavors(
        store: Arc<dyn EntityStore>,
        tasks: Arc<dyn TaskQueue>,
        analytics: Arc<dyn AnalyticsSink>,
        config: EngineConfig,
        flavors: Vec<PlatformFlavor>,
    ) -> Self {
        Self {
            store,
            tasks,
            analytics,
            config,
            flavors: flavors.into_iter().map(|f| (f.platform, f)).collect(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub(crate) fn flavor(&self, platform: Platform) -> Result<&PlatformFlavor, VoteError> {
        self.flavors
            .get(&platform)
            .ok_or_else(|| VoteError::UnsupportedPlatform(platform.to_string()))
    }

    pub(crate) fn load_blockable(&self, blockable_id: &str) -> Result<Blockable, VoteError> {
        fetch_typed(self.store.as_ref(), &keys::blockable_key(blockable_id))?
            .ok_or_else(|| VoteError::BlockableNotFound(blockable_id.to_string()))
    }

    fn load_user(&self, user_id: &str) -> Result<User, VoteError> {
        fetch_typed(self.store.as_ref(), &keys::user_key(user_id))?
            .ok_or_else(|| VoteError::UserNotFound(user_id.to_string()))
    }

    pub(crate) fn flush(&self, effects: Effects) {
        for row in effects.rows {
            self.analytics.insert(row);
        }
    }

    pub(crate) async fn defer_commit(&self, blockable_id: &str) -> Result<(), TaskError> {
        self.tasks
            .defer(
                COMMIT_CHANGES_QUEUE,
                blockable_id,
                blockable_id.as_bytes().to_vec(),
            )
            .await
    }

    // --- Voting-allowed checks ---

    /// The transaction-safe subset of the voting-allowed check. Consults only
    /// the already-loaded blockable and user.
    fn check_voting_allowed(&self, blockable: &Blockable, user: &User) -> Result<(), VoteError> {
        if blockable.state.is_voting_prohibited() {
            return Err(ProhibitedReason::ProhibitedState(blockable.state).into());
        }
        if blockable.state.is_admin_only() && !user.is_admin {
            return Err(ProhibitedReason::AdminOnly.into());
        }
        if blockable.is_certificate() && !user.is_admin {
            return Err(ProhibitedReason::AdminOnly.into());
        }
        if !user.has_capability(Capabilities::FLAG) {
            return Err(ProhibitedReason::InsufficientPermission.into());
        }
        Ok(())
    }

    /// The package-member check: a package with a flagged member (or a member
    /// signed by a flagged certificate) cannot be voted on. May read many
    /// entities and therefore only ever runs outside the transaction.
    fn check_package_members(&self, blockable: &Blockable) -> Result<(), VoteError> {
        let BlockableKind::Package { member_ids } = &blockable.kind else {
            return Ok(());
        };
        for member_id in member_ids {
            let member: Option<Blockable> =
                fetch_typed(self.store.as_ref(), &keys::blockable_key(member_id))?;
            let Some(member) = member else { continue };
            if member.flagged {
                return Err(ProhibitedReason::FlaggedMember(member.id).into());
            }
            if let Some(cert_id) = member.cert_id() {
                let cert: Option<Blockable> =
                    fetch_typed(self.store.as_ref(), &keys::blockable_key(cert_id))?;
                if cert.is_some_and(|c| c.flagged) {
                    return Err(ProhibitedReason::FlaggedMember(cert_id.to_string()).into());
                }
            }
        }
        Ok(())
    }

    // --- State transitions ---

    fn change_state(
        &self,
        blockable: &mut Blockable,
        new_state: BlockableState,
        now: UtcMicros,
        effects: &mut Effects,
    ) {
        tracing::info!(
            blockable = %blockable.id,
            from = %blockable.state,
            to = %new_state,
            "blockable state change"
        );
        blockable.change_state(new_state, now);
        effects
            .rows
            .push(rows::blockable_row(blockable, BlockAction::StateChange, now, None));
    }

    pub(crate) fn attach_change_set(
        &self,
        txn: &mut dyn StoreTxn,
        flavor: &PlatformFlavor,
        blockable: &Blockable,
        created: &[Rule],
        change_type: RulePolicy,
        now: UtcMicros,
        effects: &mut Effects,
    ) -> Result<(), StoreError> {
        if !flavor.emits_change_sets || created.is_empty() {
            return Ok(());
        }
        let change = RuleChangeSet {
            id: random_sub_id(),
            rule_ids: created.iter().map(|r| r.id.clone()).collect(),
            change_type,
            created_at: now,
        };
        put_typed(txn, &keys::change_set_key(&blockable.id, &change.id), &change)?;
        effects.trigger_commit = true;
        Ok(())
    }

    /// Checks a blockable's score against the thresholds and changes its
    /// state (synthesizing rules where the transition demands it). Returns
    /// whether a transition happened.
    fn check_and_set_state(
        &self,
        txn: &mut dyn StoreTxn,
        flavor: &PlatformFlavor,
        blockable: &mut Blockable,
        score: i64,
        now: UtcMicros,
        effects: &mut Effects,
    ) -> Result<bool, StoreError> {
        match state::evaluate(score, &self.config.voting.thresholds) {
            BlockableState::GloballyAllowed => {
                if blockable.state != BlockableState::GloballyAllowed {
                    self.change_state(blockable, BlockableState::GloballyAllowed, now, effects);
                    let created = rules::globally_allow(txn, blockable, now, &mut effects.rows)?;
                    self.attach_change_set(
                        txn,
                        flavor,
                        blockable,
                        &created,
                        RulePolicy::Allow,
                        now,
                        effects,
                    )?;
                    return Ok(true);
                }
                Ok(false)
            }
            BlockableState::ApprovedForLocalAllow => {
                if blockable.state != BlockableState::ApprovedForLocalAllow {
                    self.change_state(
                        blockable,
                        BlockableState::ApprovedForLocalAllow,
                        now,
                        effects,
                    );
                    return Ok(true);
                }
                Ok(false)
            }
            BlockableState::Banned => {
                if !blockable.state.is_banned() {
                    self.change_state(blockable, BlockableState::Banned, now, effects);
                    let created = rules::ban(txn, blockable, now, &mut effects.rows)?;
                    self.attach_change_set(
                        txn,
                        flavor,
                        blockable,
                        &created,
                        RulePolicy::Deny,
                        now,
                        effects,
                    )?;
                    return Ok(true);
                }
                Ok(false)
            }
            _ => {
                if blockable.state != BlockableState::Untrusted {
                    self.change_state(blockable, BlockableState::Untrusted, now, effects);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    // --- Vote ---

    /// Casts a vote for or against a blockable.
    ///
    /// `weight` overrides the voter's default weight; it must be
    /// non-negative. On success the persisted in-effect vote is returned.
    pub async fn vote(
        &self,
        voter_id: &str,
        blockable_id: &str,
        was_yes: bool,
        weight: Option<i64>,
    ) -> Result<Vote, VoteError> {
        let _timer = VoteTimer::new(voting_metrics());
        let result = self.vote_inner(voter_id, blockable_id, was_yes, weight).await;
        if let Err(e) = &result {
            if matches!(e, VoteError::DuplicateVote { .. }) {
                voting_metrics().inc_duplicate_votes();
            }
            quorum_telemetry::error_metrics().inc_error("vote", e.code());
        }
        result
    }

    async fn vote_inner(
        &self,
        voter_id: &str,
        blockable_id: &str,
        was_yes: bool,
        weight: Option<i64>,
    ) -> Result<Vote, VoteError> {
        let user = self.load_user(voter_id)?;
        let blockable = self.load_blockable(blockable_id)?;
        let flavor = self.flavor(blockable.platform)?;
        if blockable.is_package() && !flavor.supports_packages {
            return Err(VoteError::UnsupportedPlatform(blockable.platform.to_string()));
        }

        let weight = match weight {
            None => user.vote_weight,
            Some(w) => u32::try_from(w).map_err(|_| VoteError::InvalidWeight(w))?,
        };

        tracing::info!(
            blockable = %blockable_id,
            voter = %voter_id,
            was_yes,
            weight,
            "ballot box vote"
        );

        // Package-member reads can touch far more entities than one
        // transaction may span, so this check runs up front; the
        // transaction-safe checks run again inside.
        self.check_package_members(&blockable)?;

        let attempts = self.config.voting.max_transaction_attempts;
        let mut attempt = 0u32;
        let outcome = run_in_transaction(self.store.as_ref(), attempts, |txn| {
            attempt += 1;
            if attempt > 1 {
                voting_metrics().inc_transaction_retries();
            }
            self.vote_txn(txn, flavor, &user, blockable_id, was_yes, weight)
        })?;

        // Post-commit: externalize buffered effects.
        let prev_state = outcome.prev_state;
        let new_state = outcome.blockable.state;
        let new_vote = outcome.vote.clone();
        let trigger_commit = outcome.effects.trigger_commit;

        voting_metrics().inc_votes_cast(&outcome.blockable.platform.to_string(), was_yes);
        if new_state != prev_state {
            voting_metrics().inc_state_changes(&new_state.to_string());
        }
        let score_changed = outcome.prev_score != outcome.blockable.score;
        let score_row = score_changed.then(|| {
            rows::blockable_row(
                &outcome.blockable,
                BlockAction::ScoreChange,
                outcome.blockable.updated_at,
                None,
            )
        });
        self.flush(outcome.effects);
        if let Some(row) = score_row {
            tracing::info!(
                blockable = %blockable_id,
                from = outcome.prev_score,
                to = outcome.blockable.score,
                "blockable score change"
            );
            self.analytics.insert(row);
        }

        if trigger_commit {
            self.schedule_commit(blockable_id).await;
        }

        // Local allow rules are synthesized outside the vote transaction:
        // host selection is a non-ancestor query.
        if new_state == BlockableState::ApprovedForLocalAllow {
            let scope = if prev_state != new_state {
                // Just crossed the threshold: allow for every prior upvoter.
                Some(None)
            } else if was_yes {
                // Already in the state: the voter asked to run it too.
                Some(Some(vec![voter_id.to_string()]))
            } else {
                None
            };
            if let Some(user_ids) = scope {
                self.create_local_rules_or_defer(blockable_id, user_ids).await;
            }
        }

        Ok(new_vote)
    }

    fn vote_txn(
        &self,
        txn: &mut dyn StoreTxn,
        flavor: &PlatformFlavor,
        user: &User,
        blockable_id: &str,
        was_yes: bool,
        weight: u32,
    ) -> Result<VoteOutcome, VoteError> {
        // Re-get at the start of every attempt for up-to-date state + score.
        let mut blockable: Blockable = get_typed(txn, &keys::blockable_key(blockable_id))?
            .ok_or_else(|| VoteError::BlockableNotFound(blockable_id.to_string()))?;
        self.check_voting_allowed(&blockable, user)?;
        if blockable.is_package() && !was_yes {
            return Err(ProhibitedReason::DownvoteUnsupported.into());
        }

        let now = now_micros();
        let mut effects = Effects::default();
        let prev_state = blockable.state;
        let prev_score = blockable.score;

        // Replace any existing in-effect vote, archiving it under a fresh
        // sub-id rather than deleting it.
        let in_effect_key = keys::in_effect_vote_key(blockable_id, &user.id);
        let old_vote: Option<Vote> = get_typed(txn, &in_effect_key)?;
        if let Some(old) = &old_vote {
            if old.was_yes == was_yes {
                return Err(VoteError::DuplicateVote {
                    user: user.id.clone(),
                    blockable: blockable_id.to_string(),
                });
            }
            put_typed(
                txn,
                &keys::vote_key(blockable_id, &user.id, &random_sub_id()),
                old,
            )?;
        }

        blockable.vote_seq += 1;
        let new_vote = Vote {
            user_id: user.id.clone(),
            was_yes,
            weight,
            seq: blockable.vote_seq,
            recorded_at: now,
            candidate_type: blockable.rule_kind(),
        };
        put_typed(txn, &in_effect_key, &new_vote)?;
        effects.rows.push(rows::vote_row(&blockable, &new_vote));

        // The new vote is not yet visible to the vote index; carry the score
        // delta forward instead of re-querying.
        let new_score = score::expected_score(prev_score, old_vote.as_ref(), &new_vote);
        blockable.score = new_score;

        if new_vote.was_yes {
            if blockable.flagged {
                if user.has_capability(Capabilities::UNFLAG) {
                    blockable.flagged = false;
                } else {
                    // Double-check that an unanswered downvote still exists.
                    flags::check_flag_status(txn, &mut blockable)?;
                }
            }
            // A SUSPECT blockable only moves for users authorized to clear it.
            if blockable.state != BlockableState::Suspect
                || user.has_capability(Capabilities::MARK_MALWARE)
            {
                self.check_and_set_state(txn, flavor, &mut blockable, new_score, now, &mut effects)?;
            }
        } else {
            blockable.flagged = true;
            self.check_and_set_state(txn, flavor, &mut blockable, new_score, now, &mut effects)?;
            // A downvote from an authorized user marks the blockable SUSPECT.
            if user.has_capability(Capabilities::MARK_MALWARE) && !blockable.state.is_banned() {
                self.change_state(&mut blockable, BlockableState::Suspect, now, &mut effects);
            }
        }

        blockable.updated_at = now;
        put_typed(txn, &keys::blockable_key(blockable_id), &blockable)?;

        Ok(VoteOutcome {
            vote: new_vote,
            blockable,
            prev_score,
            prev_state,
            effects,
        })
    }

    // --- Local allow rules (outside the vote transaction) ---

    pub(crate) async fn schedule_commit(&self, blockable_id: &str) {
        if let Err(e) = self.defer_commit(blockable_id).await {
            // The deferred-task facility redelivers on restart; losing the
            // trigger here is still worth an error log.
            tracing::error!(blockable = %blockable_id, error = %e, "failed to schedule commit");
        }
    }

    async fn create_local_rules_or_defer(
        &self,
        blockable_id: &str,
        user_ids: Option<Vec<String>>,
    ) {
        if let Err(e) = self.create_local_rules(blockable_id, user_ids.clone()).await {
            tracing::warn!(
                blockable = %blockable_id,
                error = %e,
                "local rule creation failed, deferring retry"
            );
            let payload = quorum_types::codec::to_bytes_canonical(&LocalRulesTask {
                blockable_id: blockable_id.to_string(),
                user_ids,
            });
            if let Err(defer_err) = self
                .tasks
                .defer(LOCAL_RULES_QUEUE, blockable_id, payload)
                .await
            {
                tracing::error!(
                    blockable = %blockable_id,
                    error = %defer_err,
                    "failed to defer local rule creation"
                );
            }
        }
    }

    /// The in-effect upvoters of a blockable, read outside any transaction.
    fn upvoter_ids(&self, blockable_id: &str) -> Result<BTreeSet<String>, StoreError> {
        let votes: Vec<(Vec<u8>, Vote)> = quorum_api::store::fetch_scan_typed(
            self.store.as_ref(),
            &keys::vote_prefix(blockable_id),
        )?;
        Ok(votes
            .into_iter()
            .filter(|(key, vote)| keys::is_in_effect_vote_key(key) && vote.was_yes)
            .map(|(_, vote)| vote.user_id)
            .collect())
    }

    /// Creates any missing locally-scoped allow rules for the given users (or
    /// for every prior upvoter when `user_ids` is `None`).
    pub(crate) async fn create_local_rules(
        &self,
        blockable_id: &str,
        user_ids: Option<Vec<String>>,
    ) -> Result<Vec<Rule>, VoteError> {
        let blockable = self.load_blockable(blockable_id)?;
        let flavor = self.flavor(blockable.platform)?;

        let user_ids: BTreeSet<String> = match user_ids {
            Some(ids) => ids.into_iter().collect(),
            None => self.upvoter_ids(blockable_id)?,
        };

        // Host selection is a non-ancestor scan and must stay outside the
        // rule transaction.
        let mut local_rule_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for user_id in &user_ids {
            let user = match self.load_user(user_id) {
                Ok(user) => user,
                Err(VoteError::UserNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let hosts = flavor.selector.hosts_for_user(self.store.as_ref(), &user)?;
            if !hosts.is_empty() {
                local_rule_map.insert(user_id.clone(), hosts);
            }
        }
        if local_rule_map.is_empty() {
            return Ok(Vec::new());
        }

        let attempts = self.config.voting.max_transaction_attempts;
        let (created, effects) = run_in_transaction(self.store.as_ref(), attempts, |txn| {
            let blockable: Blockable = get_typed(txn, &keys::blockable_key(blockable_id))?
                .ok_or_else(|| VoteError::BlockableNotFound(blockable_id.to_string()))?;
            let now = now_micros();
            let mut effects = Effects::default();
            let created = rules::create_missing_local_allows(
                txn,
                &blockable,
                &local_rule_map,
                now,
                &mut effects.rows,
            )?;
            self.attach_change_set(
                txn,
                flavor,
                &blockable,
                &created,
                RulePolicy::Allow,
                now,
                &mut effects,
            )?;
            Ok::<_, VoteError>((created, effects))
        })?;

        tracing::info!(
            blockable = %blockable_id,
            count = created.len(),
            "created local allow rules"
        );
        for rule in &created {
            voting_metrics().inc_rules_created(&rule.policy.to_string(), "local");
        }
        let trigger_commit = effects.trigger_commit;
        self.flush(effects);
        if trigger_commit {
            self.schedule_commit(blockable_id).await;
        }
        Ok(created)
    }

    // --- Recount ---

    /// Re-derives the flagged bit, score, state and rules of a blockable from
    /// its in-effect votes. Returns whether anything had drifted.
    pub async fn recount(&self, blockable_id: &str) -> Result<bool, VoteError> {
        let result = self.recount_inner(blockable_id).await;
        if let Err(e) = &result {
            quorum_telemetry::error_metrics().inc_error("recount", e.code());
        }
        result
    }

    async fn recount_inner(&self, blockable_id: &str) -> Result<bool, VoteError> {
        let blockable = self.load_blockable(blockable_id)?;
        let flavor = self.flavor(blockable.platform)?;
        tracing::info!(blockable = %blockable_id, "recount");

        let attempts = self.config.voting.max_transaction_attempts;
        let outcome = run_in_transaction(self.store.as_ref(), attempts, |txn| {
            let mut blockable: Blockable = get_typed(txn, &keys::blockable_key(blockable_id))?
                .ok_or_else(|| VoteError::BlockableNotFound(blockable_id.to_string()))?;
            let now = now_micros();
            let mut effects = Effects::default();

            let mut changed = flags::check_flag_status(txn, &mut blockable)?;

            // Repair score drift from the in-effect votes themselves.
            let votes = flags::in_effect_votes(txn, &blockable.id)?;
            let tallied = score::tally(votes.iter());
            if tallied != blockable.score {
                tracing::info!(
                    blockable = %blockable.id,
                    stored = blockable.score,
                    tallied,
                    "score drift repaired"
                );
                blockable.score = tallied;
                changed = true;
            }

            changed |=
                self.audit_state(txn, flavor, &mut blockable, &votes, now, &mut effects)?;

            let created = rules::check_rules(txn, &blockable, now, &mut effects.rows)?;
            if let Some(first) = created.first() {
                let change_type = first.policy;
                self.attach_change_set(
                    txn,
                    flavor,
                    &blockable,
                    &created,
                    change_type,
                    now,
                    &mut effects,
                )?;
            }

            if changed {
                blockable.updated_at = now;
                put_typed(txn, &keys::blockable_key(blockable_id), &blockable)?;
            }
            Ok::<_, VoteError>(RecountOutcome { changed, effects })
        })?;

        let trigger_commit = outcome.effects.trigger_commit;
        self.flush(outcome.effects);
        if trigger_commit {
            self.schedule_commit(blockable_id).await;
        }
        Ok(outcome.changed)
    }

    /// Audits a blockable's state against past voting. SUSPECT is valid only
    /// while the most recent vote from a MARK_MALWARE-capable user is
    /// negative.
    fn audit_state(
        &self,
        txn: &mut dyn StoreTxn,
        flavor: &PlatformFlavor,
        blockable: &mut Blockable,
        votes_newest_first: &[Vote],
        now: UtcMicros,
        effects: &mut Effects,
    ) -> Result<bool, VoteError> {
        if blockable.state != BlockableState::Suspect {
            return Ok(self.check_and_set_state(
                txn,
                flavor,
                blockable,
                blockable.score,
                now,
                effects,
            )?);
        }
        for vote in votes_newest_first {
            let user: Option<User> = get_typed(txn, &keys::user_key(&vote.user_id))?;
            if user.is_some_and(|u| u.has_capability(Capabilities::MARK_MALWARE)) {
                if vote.was_yes {
                    tracing::info!(
                        blockable = %blockable.id,
                        "suspect overridden by a later authoritative yes vote"
                    );
                    return Ok(self.check_and_set_state(
                        txn,
                        flavor,
                        blockable,
                        blockable.score,
                        now,
                        effects,
                    )?);
                }
                // The most recent authoritative vote is negative: SUSPECT holds.
                return Ok(false);
            }
        }
        tracing::info!(
            blockable = %blockable.id,
            "suspect without an authoritative no vote"
        );
        Ok(self.check_and_set_state(txn, flavor, blockable, blockable.score, now, effects)?)
    }

    // --- Reset ---

    /// Resets all policy for a blockable: archives every in-effect vote,
    /// disables every in-effect rule, emits REMOVE rules, and returns the
    /// blockable to UNTRUSTED.
    pub async fn reset(&self, blockable_id: &str) -> Result<(), VoteError> {
        let result = self.reset_inner(blockable_id).await;
        if let Err(e) = &result {
            quorum_telemetry::error_metrics().inc_error("reset", e.code());
        }
        result
    }

    async fn reset_inner(&self, blockable_id: &str) -> Result<(), VoteError> {
        let blockable = self.load_blockable(blockable_id)?;
        let flavor = self.flavor(blockable.platform)?;
        tracing::info!(blockable = %blockable_id, "reset");

        let attempts = self.config.voting.max_transaction_attempts;
        let effects = run_in_transaction(self.store.as_ref(), attempts, |txn| {
            let mut blockable: Blockable = get_typed(txn, &keys::blockable_key(blockable_id))?
                .ok_or_else(|| VoteError::BlockableNotFound(blockable_id.to_string()))?;
            if blockable.is_package() {
                return Err(VoteError::from(ProhibitedReason::ResetUnsupported));
            }
            let now = now_micros();
            let mut effects = Effects::default();

            // Archive every in-effect vote under a fresh sub-id.
            let votes: Vec<(Vec<u8>, Vote)> =
                quorum_api::store::scan_typed(txn, &keys::vote_prefix(blockable_id))?;
            for (key, vote) in votes {
                if !keys::is_in_effect_vote_key(&key) {
                    continue;
                }
                txn.delete(&key)?;
                put_typed(
                    txn,
                    &keys::vote_key(blockable_id, &vote.user_id, &random_sub_id()),
                    &vote,
                )?;
            }

            // Disable every in-effect rule in place.
            let mut disabled = Vec::new();
            let all_rules: Vec<(Vec<u8>, Rule)> =
                quorum_api::store::scan_typed(txn, &keys::rule_prefix(blockable_id))?;
            for (key, mut rule) in all_rules {
                if rule.in_effect {
                    rule.mark_disabled(now);
                    txn.put(&key, &quorum_types::codec::to_bytes_canonical(&rule))?;
                    disabled.push(rule);
                }
            }

            let removes = rules::remove_rules(
                txn,
                &blockable,
                &disabled,
                flavor.per_host_remove_rules,
                now,
                &mut effects.rows,
            )?;
            self.attach_change_set(
                txn,
                flavor,
                &blockable,
                &removes,
                RulePolicy::Remove,
                now,
                &mut effects,
            )?;

            blockable.state = BlockableState::Untrusted;
            blockable.state_changed_at = now;
            blockable.flagged = false;
            blockable.score = 0;
            blockable.updated_at = now;
            effects
                .rows
                .push(rows::blockable_row(&blockable, BlockAction::Reset, now, None));
            put_typed(txn, &keys::blockable_key(blockable_id), &blockable)?;
            Ok::<_, VoteError>(effects)
        })?;

        let trigger_commit = effects.trigger_commit;
        self.flush(effects);
        if trigger_commit {
            self.schedule_commit(blockable_id).await;
        }
        Ok(())
    }
}

/// Handler retrying deferred local-rule creation.
pub struct LocalRulesHandler {
    engine: Arc<VotingEngine>,
}

impl LocalRulesHandler {
    pub fn new(engine: Arc<VotingEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskHandler for LocalRulesHandler {
    async fn run(&self, payload: &[u8]) -> Result<(), TaskError> {
        let task: LocalRulesTask = quorum_types::codec::from_bytes_canonical(payload)
            .map_err(TaskError::Permanent)?;
        self.engine
            .create_local_rules(&task.blockable_id, task.user_ids)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                VoteError::BlockableNotFound(id) => {
                    TaskError::Permanent(format!("blockable {id} vanished"))
                }
                other => TaskError::Retry(other.to_string()),
            })
    }
}
