//! The deferred-task facility the engine schedules asynchronous work on.

use async_trait::async_trait;
use quorum_types::error::TaskError;

/// A queue of deferred tasks with per-key ordering.
///
/// Tasks sharing a `key` within one queue are delivered strictly one at a
/// time, in enqueue order; tasks with different keys run independently. The
/// commit queue relies on this to serialize change-set commits per blockable.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues `payload` on `queue`, ordered under `key`.
    async fn defer(&self, queue: &str, key: &str, payload: Vec<u8>) -> Result<(), TaskError>;
}

/// Handles deliveries for one queue.
///
/// Returning [`TaskError::Retry`] re-delivers the payload later with
/// exponential backoff; [`TaskError::Permanent`] drops it after logging.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: &[u8]) -> Result<(), TaskError>;
}
