//! Defines abstract traits for metrics reporting, decoupling engine logic
//! from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured voting metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn voting_metrics() -> &'static dyn VotingMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured committer metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn committer_metrics() -> &'static dyn CommitterMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured analytics metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn analytics_metrics() -> &'static dyn AnalyticsMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured error metrics sink.
/// If no sink has been initialized, it returns a no-op sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// A sink for metrics related to the voting pipeline.
pub trait VotingMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of cast votes, labeled by platform and polarity.
    fn inc_votes_cast(&self, platform: &str, upvote: bool);
    /// Increments the counter of rejected same-polarity duplicate votes.
    fn inc_duplicate_votes(&self);
    /// Increments the counter of blockable state changes, labeled by new state.
    fn inc_state_changes(&self, state: &str);
    /// Increments the counter of rules created, labeled by policy and scope.
    fn inc_rules_created(&self, policy: &str, scope: &str);
    /// Increments the counter of vote-transaction optimistic-concurrency retries.
    fn inc_transaction_retries(&self);
    /// Observes the wall-clock duration of a complete vote entry-point call.
    fn observe_vote_duration(&self, duration_secs: f64);
}
impl VotingMetricsSink for NopSink {
    fn inc_votes_cast(&self, _platform: &str, _upvote: bool) {}
    fn inc_duplicate_votes(&self) {}
    fn inc_state_changes(&self, _state: &str) {}
    fn inc_rules_created(&self, _policy: &str, _scope: &str) {}
    fn inc_transaction_retries(&self) {}
    fn observe_vote_duration(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the Windows change-set committer.
pub trait CommitterMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of committed change sets, labeled by change type.
    fn inc_changes_committed(&self, change_type: &str);
    /// Increments the counter of change sets dropped as permanent failures.
    fn inc_permanent_failures(&self);
    /// Increments the counter of external policy API requests, labeled by route.
    fn inc_api_requests(&self, route: &str);
    /// Observes the latency from local-rule creation to endpoint fulfilment.
    fn observe_local_allow_latency(&self, duration_secs: f64);
}
impl CommitterMetricsSink for NopSink {
    fn inc_changes_committed(&self, _change_type: &str) {}
    fn inc_permanent_failures(&self) {}
    fn inc_api_requests(&self, _route: &str) {}
    fn observe_local_allow_latency(&self, _duration_secs: f64) {}
}

/// A sink for metrics related to the analytics row stream.
pub trait AnalyticsMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of rows accepted into the stream, labeled by table.
    fn inc_rows_inserted(&self, table: &str);
    /// Increments the counter of rows lost on delivery failure.
    fn inc_rows_dropped(&self);
}
impl AnalyticsMetricsSink for NopSink {
    fn inc_rows_inserted(&self, _table: &str) {}
    fn inc_rows_dropped(&self) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and variant.
    fn inc_error(&self, kind: &'static str, variant: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _variant: &'static str) {}
}

/// A unified sink that implements all domain-specific traits, providing a
/// single point of implementation for metrics backends like Prometheus.
pub trait MetricsSink:
    VotingMetricsSink + CommitterMetricsSink + AnalyticsMetricsSink + ErrorMetricsSink
{
}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where
    T: VotingMetricsSink + CommitterMetricsSink + AnalyticsMetricsSink + ErrorMetricsSink
{
}
