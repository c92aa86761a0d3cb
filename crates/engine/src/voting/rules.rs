//! The rule synthesizer: turns state transitions into concrete rule
//! mutations.
//!
//! Every function here runs inside the caller's transaction. Scans are served
//! from the transaction snapshot, so a rule written earlier in the same
//! transaction is not re-observed; callers sequence their synthesis calls
//! accordingly.

use crate::ids::random_sub_id;
use crate::rows;
use quorum_api::store::{put_typed, scan_typed, StoreTxn};
use quorum_telemetry::analytics::AnalyticsRow;
use quorum_types::error::StoreError;
use quorum_types::keys;
use quorum_types::model::{Blockable, BlockableState, Rule, RulePolicy};
use quorum_types::time::UtcMicros;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Every rule anchored under the blockable, with its key, in key order.
fn all_rules(
    txn: &mut dyn StoreTxn,
    blockable_id: &str,
) -> Result<Vec<(Vec<u8>, Rule)>, StoreError> {
    scan_typed(txn, &keys::rule_prefix(blockable_id))
}

/// The in-effect rules anchored under the blockable.
pub(crate) fn in_effect_rules(
    txn: &mut dyn StoreTxn,
    blockable_id: &str,
) -> Result<Vec<Rule>, StoreError> {
    Ok(all_rules(txn, blockable_id)?
        .into_iter()
        .map(|(_, rule)| rule)
        .filter(|rule| rule.in_effect)
        .collect())
}

fn persist(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    rule: &Rule,
) -> Result<(), StoreError> {
    put_typed(txn, &keys::rule_key(&blockable.id, &rule.id), rule)
}

fn build_rule(
    blockable: &Blockable,
    policy: RulePolicy,
    host_id: String,
    user_id: Option<String>,
    now: UtcMicros,
) -> Rule {
    Rule {
        id: random_sub_id(),
        kind: blockable.rule_kind(),
        policy,
        in_effect: true,
        host_id,
        user_id,
        is_committed: false,
        is_fulfilled: None,
        created_at: now,
        updated_at: now,
    }
}

/// Transition to GLOBALLY_ALLOWED: disable every locally-scoped ALLOW and
/// every DENY, then create the single fleet-wide ALLOW.
pub fn globally_allow(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    now: UtcMicros,
    analytics: &mut Vec<AnalyticsRow>,
) -> Result<Vec<Rule>, StoreError> {
    for (_, mut rule) in all_rules(txn, &blockable.id)? {
        // Installer rules belong to an independent pipeline and survive
        // voting transitions untouched.
        if !rule.in_effect || rule.policy.is_installer_policy() {
            continue;
        }
        if rule.policy != RulePolicy::Allow || rule.is_local() {
            rule.mark_disabled(now);
            persist(txn, blockable, &rule)?;
        }
    }

    let allow = build_rule(blockable, RulePolicy::Allow, String::new(), None, now);
    persist(txn, blockable, &allow)?;
    analytics.push(rows::rule_row(blockable, &allow, now));
    Ok(vec![allow])
}

/// Transition to BANNED: disable every in-effect ALLOW, then create the
/// fleet-wide DENY.
pub fn ban(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    now: UtcMicros,
    analytics: &mut Vec<AnalyticsRow>,
) -> Result<Vec<Rule>, StoreError> {
    for (_, mut rule) in all_rules(txn, &blockable.id)? {
        if rule.in_effect && rule.policy == RulePolicy::Allow {
            rule.mark_disabled(now);
            persist(txn, blockable, &rule)?;
        }
    }

    let deny = build_rule(blockable, RulePolicy::Deny, String::new(), None, now);
    persist(txn, blockable, &deny)?;
    analytics.push(rows::rule_row(blockable, &deny, now));
    Ok(vec![deny])
}

/// Creates any missing locally-scoped ALLOW rules for the given
/// user → host-ids mapping. Idempotent: pairs already covered by an in-effect
/// ALLOW are skipped.
pub fn create_missing_local_allows(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    local_rule_map: &BTreeMap<String, BTreeSet<String>>,
    now: UtcMicros,
    analytics: &mut Vec<AnalyticsRow>,
) -> Result<Vec<Rule>, StoreError> {
    let covered: BTreeSet<(Option<String>, String)> = all_rules(txn, &blockable.id)?
        .into_iter()
        .map(|(_, rule)| rule)
        .filter(|rule| {
            rule.in_effect && rule.policy == RulePolicy::Allow && rule.kind == blockable.rule_kind()
        })
        .map(|rule| (rule.user_id, rule.host_id))
        .collect();

    let mut created = Vec::new();
    for (user_id, host_ids) in local_rule_map {
        tracing::info!(
            blockable = %blockable.id,
            user = %user_id,
            hosts = host_ids.len(),
            "locally allowing"
        );
        for host_id in host_ids {
            let pair = (Some(user_id.clone()), host_id.clone());
            if covered.contains(&pair) {
                tracing::info!(user = %user_id, host = %host_id, "rule already exists");
                continue;
            }
            let rule = build_rule(
                blockable,
                RulePolicy::Allow,
                host_id.clone(),
                Some(user_id.clone()),
                now,
            );
            persist(txn, blockable, &rule)?;
            analytics.push(rows::rule_row(blockable, &rule, now));
            created.push(rule);
        }
    }
    Ok(created)
}

/// Reset: REMOVE rules undoing the policy the (already disabled) rules
/// carried. One per distinct host among `disabled` when `per_host` is set,
/// otherwise a single global REMOVE.
pub fn remove_rules(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    disabled: &[Rule],
    per_host: bool,
    now: UtcMicros,
    analytics: &mut Vec<AnalyticsRow>,
) -> Result<Vec<Rule>, StoreError> {
    let host_ids: BTreeSet<String> = if per_host {
        disabled.iter().map(|rule| rule.host_id.clone()).collect()
    } else {
        BTreeSet::from([String::new()])
    };

    let mut created = Vec::new();
    for host_id in host_ids {
        let rule = build_rule(blockable, RulePolicy::Remove, host_id, None, now);
        persist(txn, blockable, &rule)?;
        analytics.push(rows::rule_row(blockable, &rule, now));
        created.push(rule);
    }
    Ok(created)
}

/// Recount repair: disables rules inappropriate to the blockable's state and
/// recreates whichever mandatory rule is missing. Returns the rules created.
pub fn check_rules(
    txn: &mut dyn StoreTxn,
    blockable: &Blockable,
    now: UtcMicros,
    analytics: &mut Vec<AnalyticsRow>,
) -> Result<Vec<Rule>, StoreError> {
    let mut global_allow_exists = false;
    let mut deny_exists = false;

    for (_, mut rule) in all_rules(txn, &blockable.id)? {
        if !rule.in_effect {
            continue;
        }
        let disable = if rule.kind != blockable.rule_kind() {
            true
        } else if rule.policy.is_installer_policy() {
            // Installer rules belong to an independent pipeline; voting state
            // never invalidates them.
            false
        } else if blockable.state == BlockableState::Untrusted {
            // Local allows may survive from an earlier local-allow phase;
            // globals and denies may not.
            !rule.is_local()
        } else if rule.policy == RulePolicy::Allow {
            if blockable.state.allows_allow_rules() {
                if !rule.is_local() {
                    global_allow_exists = true;
                }
                false
            } else {
                true
            }
        } else if rule.policy == RulePolicy::Deny {
            if blockable.state.is_banned() {
                deny_exists = true;
                false
            } else {
                true
            }
        } else {
            // REMOVE rules are one-shot instructions, left as-is.
            false
        };

        if disable {
            tracing::info!(
                rule = %rule.id,
                blockable = %blockable.id,
                state = %blockable.state,
                "rule inappropriate for state, marking not in effect"
            );
            rule.mark_disabled(now);
            persist(txn, blockable, &rule)?;
        }
    }

    if blockable.state == BlockableState::GloballyAllowed && !global_allow_exists {
        tracing::info!(blockable = %blockable.id, "missing global allow rule, creating");
        return globally_allow(txn, blockable, now, analytics);
    }
    if blockable.state == BlockableState::Banned && !deny_exists {
        tracing::info!(blockable = %blockable.id, "missing deny rule, creating");
        return ban(txn, blockable, now, analytics);
    }
    Ok(Vec::new())
}
