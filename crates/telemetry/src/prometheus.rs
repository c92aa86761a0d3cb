//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram, register_int_counter, register_int_counter_vec,
    Histogram, IntCounter, IntCounterVec,
};

// --- Metric Statics ---
// OnceCell holds the metric collectors; they are initialized exactly once by
// the `install` function.

static VOTES_CAST_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static DUPLICATE_VOTES_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STATE_CHANGES_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static RULES_CREATED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static VOTE_TXN_RETRIES_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static VOTE_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();
static CHANGES_COMMITTED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static COMMIT_PERMANENT_FAILURES_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static POLICY_API_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static LOCAL_ALLOW_LATENCY_SECONDS: OnceCell<Histogram> = OnceCell::new();
static ANALYTICS_ROWS_INSERTED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static ANALYTICS_ROWS_DROPPED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Helper macro to reduce boilerplate for getting a metric from OnceCell.
/// This will panic if `install()` has not been called, which is intentional
/// as it indicates a critical application setup error.
macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("Prometheus sink not initialized. Call telemetry::prometheus::install() first.")
    };
}

#[allow(clippy::expect_used)]
impl VotingMetricsSink for PrometheusSink {
    fn inc_votes_cast(&self, platform: &str, upvote: bool) {
        let polarity = if upvote { "yes" } else { "no" };
        get_metric!(VOTES_CAST_TOTAL)
            .with_label_values(&[platform, polarity])
            .inc();
    }
    fn inc_duplicate_votes(&self) {
        get_metric!(DUPLICATE_VOTES_TOTAL).inc();
    }
    fn inc_state_changes(&self, state: &str) {
        get_metric!(STATE_CHANGES_TOTAL)
            .with_label_values(&[state])
            .inc();
    }
    fn inc_rules_created(&self, policy: &str, scope: &str) {
        get_metric!(RULES_CREATED_TOTAL)
            .with_label_values(&[policy, scope])
            .inc();
    }
    fn inc_transaction_retries(&self) {
        get_metric!(VOTE_TXN_RETRIES_TOTAL).inc();
    }
    fn observe_vote_duration(&self, duration_secs: f64) {
        get_metric!(VOTE_DURATION_SECONDS).observe(duration_secs);
    }
}

#[allow(clippy::expect_used)]
impl CommitterMetricsSink for PrometheusSink {
    fn inc_changes_committed(&self, change_type: &str) {
        get_metric!(CHANGES_COMMITTED_TOTAL)
            .with_label_values(&[change_type])
            .inc();
    }
    fn inc_permanent_failures(&self) {
        get_metric!(COMMIT_PERMANENT_FAILURES_TOTAL).inc();
    }
    fn inc_api_requests(&self, route: &str) {
        get_metric!(POLICY_API_REQUESTS_TOTAL)
            .with_label_values(&[route])
            .inc();
    }
    fn observe_local_allow_latency(&self, duration_secs: f64) {
        get_metric!(LOCAL_ALLOW_LATENCY_SECONDS).observe(duration_secs);
    }
}

#[allow(clippy::expect_used)]
impl AnalyticsMetricsSink for PrometheusSink {
    fn inc_rows_inserted(&self, table: &str) {
        get_metric!(ANALYTICS_ROWS_INSERTED_TOTAL)
            .with_label_values(&[table])
            .inc();
    }
    fn inc_rows_dropped(&self) {
        get_metric!(ANALYTICS_ROWS_DROPPED_TOTAL).inc();
    }
}

#[allow(clippy::expect_used)]
impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, variant: &'static str) {
        get_metric!(ERRORS_TOTAL)
            .with_label_values(&[kind, variant])
            .inc();
    }
}

/// Registers every collector with the default Prometheus registry and
/// installs [`PrometheusSink`] as the global sink.
///
/// Idempotent; a second call is a no-op.
pub fn install() -> Result<(), prometheus::Error> {
    if crate::sinks::SINK.get().is_some() {
        return Ok(());
    }
    let _ = VOTES_CAST_TOTAL.set(register_int_counter_vec!(
        "quorum_votes_cast_total",
        "Total votes cast, labeled by platform and polarity.",
        &["platform", "polarity"]
    )?);
    let _ = DUPLICATE_VOTES_TOTAL.set(register_int_counter!(
        "quorum_duplicate_votes_total",
        "Total same-polarity duplicate votes rejected."
    )?);
    let _ = STATE_CHANGES_TOTAL.set(register_int_counter_vec!(
        "quorum_state_changes_total",
        "Total blockable state changes, labeled by new state.",
        &["state"]
    )?);
    let _ = RULES_CREATED_TOTAL.set(register_int_counter_vec!(
        "quorum_rules_created_total",
        "Total rules created, labeled by policy and scope.",
        &["policy", "scope"]
    )?);
    let _ = VOTE_TXN_RETRIES_TOTAL.set(register_int_counter!(
        "quorum_vote_transaction_retries_total",
        "Total optimistic-concurrency retries of the vote transaction."
    )?);
    let _ = VOTE_DURATION_SECONDS.set(register_histogram!(
        "quorum_vote_duration_seconds",
        "Wall-clock duration of complete vote entry-point calls.",
        exponential_buckets(0.001, 2.0, 14)?
    )?);
    let _ = CHANGES_COMMITTED_TOTAL.set(register_int_counter_vec!(
        "quorum_changes_committed_total",
        "Total change sets committed to the external policy service.",
        &["change_type"]
    )?);
    let _ = COMMIT_PERMANENT_FAILURES_TOTAL.set(register_int_counter!(
        "quorum_commit_permanent_failures_total",
        "Total change sets dropped as permanently uncommittable."
    )?);
    let _ = POLICY_API_REQUESTS_TOTAL.set(register_int_counter_vec!(
        "quorum_policy_api_requests_total",
        "Total requests issued to the external policy API, labeled by route.",
        &["route"]
    )?);
    let _ = LOCAL_ALLOW_LATENCY_SECONDS.set(register_histogram!(
        "quorum_local_allow_latency_seconds",
        "Latency from local-rule creation to endpoint fulfilment.",
        exponential_buckets(0.5, 2.0, 16)?
    )?);
    let _ = ANALYTICS_ROWS_INSERTED_TOTAL.set(register_int_counter_vec!(
        "quorum_analytics_rows_inserted_total",
        "Total analytics rows accepted, labeled by table.",
        &["table"]
    )?);
    let _ = ANALYTICS_ROWS_DROPPED_TOTAL.set(register_int_counter!(
        "quorum_analytics_rows_dropped_total",
        "Total analytics rows lost on delivery failure."
    )?);
    let _ = ERRORS_TOTAL.set(register_int_counter_vec!(
        "quorum_errors_total",
        "Total errors, labeled by kind and variant.",
        &["kind", "variant"]
    )?);

    static PROMETHEUS_SINK: PrometheusSink = PrometheusSink;
    let _ = crate::sinks::SINK.set(&PROMETHEUS_SINK);
    Ok(())
}
