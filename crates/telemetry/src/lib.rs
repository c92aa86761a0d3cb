#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # Quorum Telemetry
//!
//! Observability infrastructure for the policy engine: structured logging
//! initialization, a Prometheus metrics endpoint, abstract metrics sinks, and
//! the append-only analytics row stream that records every vote, rule and
//! blockable lifecycle event.

/// The append-only analytics row stream and its per-table row schemas.
pub mod analytics;
/// A lightweight HTTP server exposing `/metrics`, `/healthz` and `/readyz`.
pub mod http;
/// The initialization routine for global structured logging.
pub mod init;
/// The concrete implementation of metrics sinks using the `prometheus` crate.
pub mod prometheus;
/// Abstract traits (`*MetricsSink`) that define the contract for metrics reporting.
pub mod sinks;
/// A simple RAII timer for measuring the duration of a scope.
pub mod time;

pub use sinks::{committer_metrics, error_metrics, voting_metrics};
