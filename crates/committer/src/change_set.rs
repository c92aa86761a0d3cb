//! Claiming and committing rule change sets.
//!
//! One change set is committed per task run, oldest first; if more remain for
//! the blockable afterwards, the worker tail-defers itself. Local rules are
//! committed before global rules within one change. Rules already marked
//! `is_committed` are skipped, which makes redelivery of a task a no-op.

use crate::api::{
    FileInstanceUpdate, FileRule, PolicyApi, STATE_APPROVED, STATE_BANNED, STATE_UNAPPROVED,
};
use async_trait::async_trait;
use quorum_api::store::{fetch_scan_typed, fetch_typed, store_typed, EntityStore};
use quorum_api::tasks::{TaskHandler, TaskQueue};
use quorum_telemetry::sinks::committer_metrics;
use quorum_types::config::HostHealthConfig;
use quorum_types::error::{ApiError, CommitError, TaskError};
use quorum_types::keys;
use quorum_types::model::{Blockable, Rule, RuleChangeSet, RulePolicy};
use quorum_types::queues::COMMIT_CHANGES_QUEUE;
use quorum_types::time::now_micros;
use std::sync::Arc;

/// The deferred worker draining pending change sets for one blockable at a
/// time.
pub struct ChangeSetCommitter {
    store: Arc<dyn EntityStore>,
    tasks: Arc<dyn TaskQueue>,
    api: Arc<dyn PolicyApi>,
    health: HostHealthConfig,
}

impl ChangeSetCommitter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        tasks: Arc<dyn TaskQueue>,
        api: Arc<dyn PolicyApi>,
        health: HostHealthConfig,
    ) -> Self {
        Self {
            store,
            tasks,
            api,
            health,
        }
    }

    fn pending_changes(
        &self,
        blockable_id: &str,
    ) -> Result<Vec<(Vec<u8>, RuleChangeSet)>, CommitError> {
        let mut changes: Vec<(Vec<u8>, RuleChangeSet)> =
            fetch_scan_typed(self.store.as_ref(), &keys::change_set_prefix(blockable_id))?;
        changes.sort_by(|a, b| {
            (a.1.created_at, &a.1.id).cmp(&(b.1.created_at, &b.1.id))
        });
        Ok(changes)
    }

    /// Commits the oldest pending change set for the blockable, then
    /// tail-defers if more remain. A no-op when nothing is pending.
    pub async fn commit_blockable_changes(&self, blockable_id: &str) -> Result<(), CommitError> {
        let changes = self.pending_changes(blockable_id)?;
        let Some((change_key, change)) = changes.into_iter().next() else {
            return Ok(());
        };

        let blockable: Blockable =
            fetch_typed(self.store.as_ref(), &keys::blockable_key(blockable_id))?.ok_or_else(
                || CommitError::Malformed(format!("no blockable {blockable_id} for change set")),
            )?;

        self.commit_change_set(&blockable, &change_key, &change)
            .await?;

        if !self.pending_changes(blockable_id)?.is_empty() {
            tracing::info!(blockable = %blockable_id, "more changes pending, tail-deferring");
            // A lost tail-defer only delays the next commit until the next
            // trigger; never fail the completed one over it.
            if let Err(e) = self
                .tasks
                .defer(
                    COMMIT_CHANGES_QUEUE,
                    blockable_id,
                    blockable_id.as_bytes().to_vec(),
                )
                .await
            {
                tracing::error!(blockable = %blockable_id, error = %e, "tail-defer failed");
            }
        }
        Ok(())
    }

    async fn commit_change_set(
        &self,
        blockable: &Blockable,
        change_key: &[u8],
        change: &RuleChangeSet,
    ) -> Result<(), CommitError> {
        tracing::info!(
            blockable = %blockable.id,
            change = %change.id,
            change_type = %change.change_type,
            rules = change.rule_ids.len(),
            "committing change set"
        );

        let mut rules: Vec<(Vec<u8>, Rule)> = Vec::new();
        for rule_id in &change.rule_ids {
            let key = keys::rule_key(&blockable.id, rule_id);
            match fetch_typed::<Rule>(self.store.as_ref(), &key)? {
                Some(rule) => rules.push((key, rule)),
                None => {
                    tracing::warn!(
                        blockable = %blockable.id,
                        rule = %rule_id,
                        "change set references a missing rule, skipping"
                    );
                }
            }
        }

        if change.change_type == RulePolicy::Deny
            && (change.rule_ids.len() > 1 || rules.iter().any(|(_, r)| r.is_local()))
        {
            return Err(CommitError::Malformed(format!(
                "deny change {} for {} must carry exactly one global rule",
                change.id, blockable.id
            )));
        }

        let (local, global): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(|(_, rule)| rule.is_local());

        // Locals first, then globals.
        let mut unresolved = 0usize;
        if let Some(local_state) = local_state_for(change.change_type) {
            for (key, rule) in local {
                if rule.is_committed {
                    continue;
                }
                unresolved += usize::from(
                    !self
                        .commit_local_rule(blockable, &key, rule, local_state)
                        .await?,
                );
            }
        }
        for (key, rule) in global {
            if rule.is_committed {
                continue;
            }
            self.commit_global_rule(blockable, &key, rule, change.change_type)
                .await?;
        }

        if unresolved > 0 {
            // Endpoints that have neither the file nor a healthy sync state
            // keep their rules unclaimed; redelivery retries them.
            return Err(CommitError::Api(ApiError::Transient {
                status: None,
                message: format!("{unresolved} local rules await their endpoints"),
            }));
        }

        self.store.delete(change_key)?;
        committer_metrics().inc_changes_committed(&change.change_type.to_string());
        Ok(())
    }

    /// Commits one locally-scoped rule. Returns false when the rule must stay
    /// unclaimed for a later retry.
    async fn commit_local_rule(
        &self,
        blockable: &Blockable,
        key: &[u8],
        mut rule: Rule,
        local_state: i32,
    ) -> Result<bool, CommitError> {
        if blockable.is_certificate() {
            // The API has no per-host certificate state; record the intent as
            // committed-but-unfulfilled.
            rule.is_fulfilled = Some(false);
            return self.finish_rule(key, &mut rule).map(|()| true);
        }

        let computer_id: i64 = rule.host_id.parse().map_err(|_| {
            CommitError::Malformed(format!("rule {} has non-numeric host id", rule.id))
        })?;

        let Some(catalog_id) = catalog_id(blockable) else {
            // The service has not cataloged the file yet; treat like an
            // absent instance and consult endpoint health below.
            return self
                .absent_instance(&mut rule, key, computer_id)
                .await;
        };

        let instances = self.api.find_file_instances(computer_id, catalog_id).await?;
        if instances.is_empty() {
            return self.absent_instance(&mut rule, key, computer_id).await;
        }

        for instance in instances {
            self.api
                .set_file_instance_state(FileInstanceUpdate {
                    id: instance.id,
                    local_state,
                    file_catalog_id: catalog_id,
                    computer_id,
                })
                .await?;
        }
        rule.is_fulfilled = Some(true);
        if rule.policy == RulePolicy::Allow {
            let latency = now_micros().saturating_sub(rule.created_at) as f64 / 1_000_000.0;
            committer_metrics().observe_local_allow_latency(latency);
        }
        self.finish_rule(key, &mut rule).map(|()| true)
    }

    /// The file is not on the endpoint. A healthy endpoint simply does not
    /// have it (committed, unfulfilled); an unhealthy one gets a retry.
    async fn absent_instance(
        &self,
        rule: &mut Rule,
        key: &[u8],
        computer_id: i64,
    ) -> Result<bool, CommitError> {
        let computer = self.api.get_computer(computer_id).await?;
        let healthy = computer.is_some_and(|c| c.is_healthy(&self.health));
        if healthy {
            rule.is_fulfilled = Some(false);
            self.finish_rule(key, rule)?;
            Ok(true)
        } else {
            tracing::info!(
                rule = %rule.id,
                computer = computer_id,
                "endpoint not healthy, leaving rule unclaimed"
            );
            Ok(false)
        }
    }

    async fn commit_global_rule(
        &self,
        blockable: &Blockable,
        key: &[u8],
        mut rule: Rule,
        change_type: RulePolicy,
    ) -> Result<(), CommitError> {
        if blockable.is_certificate() {
            let state = global_state_for(change_type).ok_or_else(|| {
                CommitError::Malformed(format!(
                    "{change_type} is not a certificate change"
                ))
            })?;
            let cert = self
                .api
                .find_certificate(&blockable.id)
                .await?
                .ok_or(ApiError::Transient {
                    status: None,
                    message: format!("certificate {} not known to the service yet", blockable.id),
                })?;
            self.api
                .set_certificate_state(crate::api::CertificateUpdate {
                    id: cert.id,
                    thumbprint: blockable.id.clone(),
                    certificate_state: state,
                })
                .await?;
            return self.finish_rule(key, &mut rule);
        }

        let Some(catalog_id) = catalog_id(blockable) else {
            return Err(CommitError::Api(ApiError::Transient {
                status: None,
                message: format!("blockable {} has no catalog id yet", blockable.id),
            }));
        };

        let file_rule = match change_type {
            RulePolicy::ForceInstaller => FileRule {
                file_catalog_id: catalog_id,
                file_state: None,
                force_installer: Some(true),
                force_not_installer: Some(false),
            },
            RulePolicy::ForceNotInstaller => FileRule {
                file_catalog_id: catalog_id,
                file_state: None,
                force_installer: Some(false),
                force_not_installer: Some(true),
            },
            other => FileRule {
                file_catalog_id: catalog_id,
                file_state: Some(global_state_for(other).ok_or_else(|| {
                    CommitError::Malformed(format!("{other} is not a global change"))
                })?),
                force_installer: None,
                force_not_installer: None,
            },
        };
        self.api.create_file_rule(file_rule).await?;
        self.finish_rule(key, &mut rule)
    }

    fn finish_rule(&self, key: &[u8], rule: &mut Rule) -> Result<(), CommitError> {
        rule.is_committed = true;
        rule.updated_at = now_micros();
        store_typed(self.store.as_ref(), key, rule)?;
        Ok(())
    }
}

fn catalog_id(blockable: &Blockable) -> Option<i64> {
    blockable.file_catalog_id().and_then(|id| id.parse().ok())
}

fn local_state_for(change_type: RulePolicy) -> Option<i32> {
    match change_type {
        RulePolicy::Allow => Some(STATE_APPROVED),
        RulePolicy::Remove => Some(STATE_UNAPPROVED),
        _ => None,
    }
}

fn global_state_for(change_type: RulePolicy) -> Option<i32> {
    match change_type {
        RulePolicy::Allow => Some(STATE_APPROVED),
        RulePolicy::Deny => Some(STATE_BANNED),
        RulePolicy::Remove => Some(STATE_UNAPPROVED),
        _ => None,
    }
}

/// Task-queue handler for the commit queue. Payloads are blockable ids.
pub struct CommitChangesHandler {
    committer: Arc<ChangeSetCommitter>,
}

impl CommitChangesHandler {
    pub fn new(committer: Arc<ChangeSetCommitter>) -> Self {
        Self { committer }
    }
}

#[async_trait]
impl TaskHandler for CommitChangesHandler {
    async fn run(&self, payload: &[u8]) -> Result<(), TaskError> {
        let blockable_id = std::str::from_utf8(payload)
            .map_err(|_| TaskError::Permanent("non-utf8 commit payload".to_string()))?;
        self.committer
            .commit_blockable_changes(blockable_id)
            .await
            .map_err(|e| {
                let task_error = TaskError::from(e);
                if matches!(task_error, TaskError::Permanent(_)) {
                    committer_metrics().inc_permanent_failures();
                }
                task_error
            })
    }
}

#[cfg(test)]
mod tests;
