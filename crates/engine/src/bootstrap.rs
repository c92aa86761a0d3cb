//! Critical-rule bootstrap: a fixed set of never-blockable rules that must
//! exist before the engine serves its first vote.
//!
//! Runs at most once per process lifetime but is idempotent, so racing
//! processes and restarts are harmless.

use crate::ids::random_sub_id;
use quorum_api::store::{get_typed, put_typed, run_in_transaction, scan_typed, EntityStore};
use quorum_types::config::CriticalRuleSpec;
use quorum_types::error::StoreError;
use quorum_types::keys;
use quorum_types::model::{
    Blockable, BlockableKind, BlockableState, IdType, Rule, RuleKind, RulePolicy,
};
use quorum_types::time::now_micros;
use std::sync::atomic::{AtomicBool, Ordering};

static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

/// Ensures every configured critical rule exists and is in effect, creating
/// the backing blockable when missing. Later calls in the same process are
/// no-ops.
pub fn ensure_critical_rules(
    store: &dyn EntityStore,
    specs: &[CriticalRuleSpec],
) -> Result<(), StoreError> {
    if BOOTSTRAPPED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    for spec in specs {
        if let Err(e) = ensure_one(store, spec) {
            // Leave the latch unset so a later call retries the whole set.
            BOOTSTRAPPED.store(false, Ordering::SeqCst);
            return Err(e);
        }
    }
    tracing::info!(count = specs.len(), "critical rules ensured");
    Ok(())
}

fn ensure_one(store: &dyn EntityStore, spec: &CriticalRuleSpec) -> Result<(), StoreError> {
    run_in_transaction(store, 4, |txn| {
        let now = now_micros();
        let blockable_key = keys::blockable_key(&spec.blockable_id);
        let existing: Option<Blockable> = get_typed(txn, &blockable_key)?;
        if existing.is_none() {
            let blockable = Blockable {
                id: spec.blockable_id.clone(),
                id_type: match spec.kind {
                    RuleKind::Certificate => IdType::CertFingerprint,
                    RuleKind::Package => IdType::BundleId,
                    RuleKind::Binary => IdType::Sha256,
                },
                platform: spec.platform,
                state: BlockableState::Untrusted,
                flagged: false,
                score: 0,
                vote_seq: 0,
                first_seen_at: now,
                updated_at: now,
                state_changed_at: now,
                file_name: None,
                publisher: None,
                product_name: None,
                version: None,
                kind: match spec.kind {
                    RuleKind::Certificate => BlockableKind::Certificate,
                    RuleKind::Package => BlockableKind::Package {
                        member_ids: Vec::new(),
                    },
                    RuleKind::Binary => BlockableKind::Binary {
                        cert_id: None,
                        file_catalog_id: None,
                        is_installer: false,
                        is_compiler: false,
                    },
                },
            };
            put_typed(txn, &blockable_key, &blockable)?;
        }

        let has_allow = scan_typed::<Rule>(txn, &keys::rule_prefix(&spec.blockable_id))?
            .into_iter()
            .any(|(_, rule)| {
                rule.in_effect
                    && rule.policy == RulePolicy::Allow
                    && !rule.is_local()
                    && rule.kind == spec.kind
            });
        if !has_allow {
            tracing::info!(blockable = %spec.blockable_id, "creating critical allow rule");
            let rule = Rule {
                id: random_sub_id(),
                kind: spec.kind,
                policy: RulePolicy::Allow,
                in_effect: true,
                host_id: String::new(),
                user_id: None,
                is_committed: true,
                is_fulfilled: None,
                created_at: now,
                updated_at: now,
            };
            put_typed(txn, &keys::rule_key(&spec.blockable_id, &rule.id), &rule)?;
        }
        Ok::<_, StoreError>(())
    })
}

/// Clears the process-wide latch. Tests only.
#[doc(hidden)]
pub fn reset_latch_for_tests() {
    BOOTSTRAPPED.store(false, Ordering::SeqCst);
}
