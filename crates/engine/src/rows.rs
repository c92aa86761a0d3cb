//! Builders for the analytics rows the engine emits.

use quorum_telemetry::analytics::{
    AnalyticsRow, AnalyticsTable, BlockAction, BlockableRow, RuleRow, VoteRow,
};
use quorum_types::model::{Blockable, BlockableKind, Rule, Vote};
use quorum_types::time::UtcMicros;

fn table_for(blockable: &Blockable) -> AnalyticsTable {
    match blockable.kind {
        BlockableKind::Binary { .. } => AnalyticsTable::Binary,
        BlockableKind::Certificate => AnalyticsTable::Certificate,
        BlockableKind::Package { .. } => AnalyticsTable::Bundle,
    }
}

pub(crate) fn blockable_row(
    blockable: &Blockable,
    action: BlockAction,
    timestamp: UtcMicros,
    comment: Option<String>,
) -> AnalyticsRow {
    AnalyticsRow::Blockable(BlockableRow {
        table: table_for(blockable),
        target_id: blockable.id.clone(),
        timestamp,
        action,
        state: blockable.state,
        score: blockable.score,
        platform: blockable.platform,
        first_seen_file_name: blockable.file_name.clone(),
        cert_fingerprint: blockable.cert_id().map(str::to_string),
        comment,
    })
}

pub(crate) fn vote_row(blockable: &Blockable, vote: &Vote) -> AnalyticsRow {
    AnalyticsRow::Vote(VoteRow {
        target_id: blockable.id.clone(),
        timestamp: vote.recorded_at,
        upvote: vote.was_yes,
        weight: vote.weight,
        platform: blockable.platform,
        target_type: vote.candidate_type,
        voter: vote.user_id.clone(),
    })
}

pub(crate) fn rule_row(blockable: &Blockable, rule: &Rule, timestamp: UtcMicros) -> AnalyticsRow {
    let local = rule.is_local() || rule.user_id.is_some();
    AnalyticsRow::Rule(RuleRow {
        target_id: blockable.id.clone(),
        timestamp,
        scope: if local { "local" } else { "global" }.to_string(),
        policy: rule.policy,
        target_type: rule.kind,
        device_id: if rule.host_id.is_empty() {
            None
        } else {
            Some(rule.host_id.clone())
        },
        user: rule.user_id.clone(),
    })
}
