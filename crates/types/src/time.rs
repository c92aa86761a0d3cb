//! Wall-clock helpers shared by every crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
pub type UtcMicros = u64;

/// The current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> UtcMicros {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Age in whole seconds of a past timestamp, saturating at zero.
pub fn age_secs(then: UtcMicros, now: UtcMicros) -> u64 {
    now.saturating_sub(then) / 1_000_000
}
