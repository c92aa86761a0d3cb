//! A task queue that records deferred work for tests to inspect and pump.

use async_trait::async_trait;
use quorum_api::tasks::{TaskHandler, TaskQueue};
use quorum_types::error::TaskError;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One recorded deferral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub queue: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Records every deferred task instead of running it; tests drain queues
/// explicitly, which makes tail-defers and retries observable.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    tasks: Mutex<VecDeque<QueuedTask>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks currently pending on `queue`, in enqueue order.
    pub fn pending(&self, queue: &str) -> Vec<QueuedTask> {
        self.tasks
            .lock()
            .map(|t| t.iter().filter(|task| task.queue == queue).cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, queue: &str) -> usize {
        self.pending(queue).len()
    }

    /// Pops the oldest task pending on `queue`.
    pub fn pop(&self, queue: &str) -> Option<QueuedTask> {
        let mut tasks = self.tasks.lock().ok()?;
        let index = tasks.iter().position(|task| task.queue == queue)?;
        tasks.remove(index)
    }

    /// Runs tasks on `queue` through `handler` until the queue is empty,
    /// including tasks the handler defers while running (tail-defers).
    /// Handler errors end the drain and are returned.
    pub async fn drain(&self, queue: &str, handler: &dyn TaskHandler) -> Result<usize, TaskError> {
        let mut ran = 0usize;
        // Generous bound so a tail-defer loop cannot hang the test.
        for _ in 0..1000 {
            let Some(task) = self.pop(queue) else {
                return Ok(ran);
            };
            handler.run(&task.payload).await?;
            ran += 1;
        }
        Err(TaskError::Permanent(format!(
            "queue {queue} did not drain within 1000 tasks"
        )))
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn defer(&self, queue: &str, key: &str, payload: Vec<u8>) -> Result<(), TaskError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| TaskError::QueueClosed(queue.to_string()))?;
        tasks.push_back(QueuedTask {
            queue: queue.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}
