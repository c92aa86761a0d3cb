//! The append-only analytics row stream.
//!
//! Every vote, rule mutation and blockable lifecycle event is recorded as a
//! typed row destined for the analytics warehouse. Delivery is best-effort
//! but must never slow down or fail the caller: `insert` only hands the row
//! to an unbounded channel, and a background flusher serializes and ships it.
//! A lost row is logged and counted, never surfaced.

use crate::sinks::analytics_metrics;
use quorum_types::model::{BlockableState, Platform, RuleKind, RulePolicy};
use quorum_types::time::UtcMicros;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Destination tables of the analytics warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyticsTable {
    Binary,
    Certificate,
    Bundle,
    Vote,
    Rule,
    Host,
    User,
}

impl AnalyticsTable {
    pub fn name(self) -> &'static str {
        match self {
            AnalyticsTable::Binary => "BINARY",
            AnalyticsTable::Certificate => "CERTIFICATE",
            AnalyticsTable::Bundle => "BUNDLE",
            AnalyticsTable::Vote => "VOTE",
            AnalyticsTable::Rule => "RULE",
            AnalyticsTable::Host => "HOST",
            AnalyticsTable::User => "USER",
        }
    }
}

/// Lifecycle actions recorded on the blockable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockAction {
    FirstSeen,
    ScoreChange,
    StateChange,
    Reset,
    Comment,
}

/// One row of the VOTE table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRow {
    pub target_id: String,
    pub timestamp: UtcMicros,
    pub upvote: bool,
    pub weight: u32,
    pub platform: Platform,
    pub target_type: RuleKind,
    pub voter: String,
}

/// One row of the BINARY / CERTIFICATE / BUNDLE tables; which one is decided
/// by the blockable's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockableRow {
    pub table: AnalyticsTable,
    pub target_id: String,
    pub timestamp: UtcMicros,
    pub action: BlockAction,
    pub state: BlockableState,
    pub score: i64,
    pub platform: Platform,
    pub first_seen_file_name: Option<String>,
    pub cert_fingerprint: Option<String>,
    pub comment: Option<String>,
}

/// One row of the RULE table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    pub target_id: String,
    pub timestamp: UtcMicros,
    /// `local` when host- or user-scoped, `global` otherwise.
    pub scope: String,
    pub policy: RulePolicy,
    pub target_type: RuleKind,
    pub device_id: Option<String>,
    pub user: Option<String>,
}

/// One row of the HOST table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRow {
    pub device_id: String,
    pub timestamp: UtcMicros,
    pub action: String,
    pub hostname: String,
    pub platform: Platform,
    pub users: Vec<String>,
}

/// One row of the USER table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub email: String,
    pub timestamp: UtcMicros,
    pub action: String,
    pub vote_weight: u32,
}

/// A typed row plus its destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyticsRow {
    Vote(VoteRow),
    Blockable(BlockableRow),
    Rule(RuleRow),
    Host(HostRow),
    User(UserRow),
}

impl AnalyticsRow {
    pub fn table(&self) -> AnalyticsTable {
        match self {
            AnalyticsRow::Vote(_) => AnalyticsTable::Vote,
            AnalyticsRow::Blockable(row) => row.table,
            AnalyticsRow::Rule(_) => AnalyticsTable::Rule,
            AnalyticsRow::Host(_) => AnalyticsTable::Host,
            AnalyticsRow::User(_) => AnalyticsTable::User,
        }
    }
}

/// The append-only sink the engine hands rows to.
///
/// Implementations must return without blocking and without failing; rows
/// are flushed out-of-band.
pub trait AnalyticsSink: Send + Sync {
    fn insert(&self, row: AnalyticsRow);
}

/// Discards every row. The default when analytics is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopAnalytics;

impl AnalyticsSink for NopAnalytics {
    fn insert(&self, _row: AnalyticsRow) {}
}

/// Collects rows in memory; used by tests to assert on emitted rows.
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    rows: Mutex<Vec<AnalyticsRow>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every row inserted so far, in insertion order.
    pub fn rows(&self) -> Vec<AnalyticsRow> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Rows destined for `table`, in insertion order.
    pub fn rows_for(&self, table: AnalyticsTable) -> Vec<AnalyticsRow> {
        self.rows()
            .into_iter()
            .filter(|r| r.table() == table)
            .collect()
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn insert(&self, row: AnalyticsRow) {
        analytics_metrics().inc_rows_inserted(row.table().name());
        if let Ok(mut rows) = self.rows.lock() {
            rows.push(row);
        }
    }
}

/// Writes serialized rows to their final destination.
pub trait RowWriter: Send {
    fn write(&mut self, table: &str, json: &str);
}

/// Emits rows as structured log events; the log pipeline ships them onward.
#[derive(Debug, Default)]
pub struct LogRowWriter;

impl RowWriter for LogRowWriter {
    fn write(&mut self, table: &str, json: &str) {
        tracing::info!(target: "analytics", table, row = %json, "analytics row");
    }
}

/// Buffers rows on an unbounded channel and flushes them from a background
/// task, so the voting hot path never waits on row delivery.
pub struct BufferedAnalytics {
    tx: mpsc::UnboundedSender<AnalyticsRow>,
}

impl BufferedAnalytics {
    /// Spawns the flusher on the current tokio runtime.
    pub fn spawn(mut writer: Box<dyn RowWriter>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnalyticsRow>();
        tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                match serde_json::to_string(&row) {
                    Ok(json) => writer.write(row.table().name(), &json),
                    Err(e) => {
                        analytics_metrics().inc_rows_dropped();
                        tracing::warn!(error = %e, "dropping unserializable analytics row");
                    }
                }
            }
        });
        Self { tx }
    }
}

impl AnalyticsSink for BufferedAnalytics {
    fn insert(&self, row: AnalyticsRow) {
        analytics_metrics().inc_rows_inserted(row.table().name());
        if self.tx.send(row).is_err() {
            // Flusher gone; the row is lost but the caller must not fail.
            analytics_metrics().inc_rows_dropped();
            tracing::warn!("analytics flusher is down, dropping row");
        }
    }
}
