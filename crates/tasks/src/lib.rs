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

//! An in-process deferred-task runner implementing
//! [`quorum_api::tasks::TaskQueue`].
//!
//! Tasks enqueued under the same (queue, key) pair run strictly one at a
//! time, in order: each pair owns a lane backed by an unbounded channel and a
//! dedicated worker task. The commit queue keys lanes by blockable id, which
//! is what serializes change-set commits per blockable.
//!
//! A handler returning [`TaskError::Retry`] is re-run in place with
//! exponential backoff and jitter until the attempt budget is exhausted;
//! [`TaskError::Permanent`] drops the payload immediately after logging.

use async_trait::async_trait;
use quorum_api::tasks::{TaskHandler, TaskQueue};
use quorum_types::error::TaskError;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Retry policy of the runner.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total delivery attempts per payload before it is dropped.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(300),
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    /// The backoff before retry number `attempt` (1-based), with ±20% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        base.mul_f64(jitter)
    }
}

struct Inner {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    lanes: Mutex<HashMap<(String, String), mpsc::UnboundedSender<Vec<u8>>>>,
    policy: RetryPolicy,
}

/// The in-process task runner. Cheap to clone; all clones share lanes.
#[derive(Clone)]
pub struct InProcessQueues {
    inner: Arc<Inner>,
}

impl InProcessQueues {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
                policy,
            }),
        }
    }

    /// Registers the handler for a queue. Must happen before work is deferred
    /// onto that queue; deliveries with no handler are dropped with an error
    /// log.
    pub async fn register(&self, queue: &str, handler: Arc<dyn TaskHandler>) {
        self.inner
            .handlers
            .write()
            .await
            .insert(queue.to_string(), handler);
    }

    async fn lane(&self, queue: &str, key: &str) -> mpsc::UnboundedSender<Vec<u8>> {
        let mut lanes = self.inner.lanes.lock().await;
        if let Some(tx) = lanes.get(&(queue.to_string(), key.to_string())) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        lanes.insert((queue.to_string(), key.to_string()), tx.clone());
        let inner = self.inner.clone();
        let queue_name = queue.to_string();
        let lane_key = key.to_string();
        tokio::spawn(async move {
            run_lane(inner, queue_name, lane_key, rx).await;
        });
        tx
    }
}

async fn run_lane(
    inner: Arc<Inner>,
    queue: String,
    key: String,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(payload) = rx.recv().await {
        let handler = inner.handlers.read().await.get(&queue).cloned();
        let Some(handler) = handler else {
            tracing::error!(queue, key, "no handler registered, dropping task");
            continue;
        };
        deliver(&inner.policy, &queue, &key, handler, &payload).await;
    }
}

async fn deliver(
    policy: &RetryPolicy,
    queue: &str,
    key: &str,
    handler: Arc<dyn TaskHandler>,
    payload: &[u8],
) {
    for attempt in 1..=policy.max_attempts.max(1) {
        match handler.run(payload).await {
            Ok(()) => return,
            Err(TaskError::Permanent(reason)) => {
                tracing::error!(queue, key, reason, "permanent task failure, dropping");
                return;
            }
            Err(TaskError::QueueClosed(name)) => {
                tracing::error!(queue, key, closed = name, "queue closed mid-task, dropping");
                return;
            }
            Err(TaskError::Retry(reason)) => {
                if attempt == policy.max_attempts.max(1) {
                    tracing::error!(
                        queue,
                        key,
                        reason,
                        attempts = attempt,
                        "retry budget exhausted, dropping task"
                    );
                    return;
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(queue, key, reason, attempt, ?delay, "task failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InProcessQueues {
    async fn defer(&self, queue: &str, key: &str, payload: Vec<u8>) -> Result<(), TaskError> {
        let lane = self.lane(queue, key).await;
        lane.send(payload)
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))
    }
}
