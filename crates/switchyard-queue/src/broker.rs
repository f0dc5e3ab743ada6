//! Broker abstraction.

use async_trait::async_trait;
use serde::Serialize;

use switchyard_core::Result;

use crate::task::{QueueName, Task};

/// What happened to a task handed back with [`Broker::nack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Queued again for another attempt.
    Requeued,
    /// Out of attempts, parked as failed.
    DeadLettered,
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
    pub dead: usize,
    pub total_processed: u64,
}

/// A priority multi-queue task broker.
///
/// `pop` returns the highest priority task of a queue, FIFO within a
/// priority. A popped task stays owned by the broker until `ack` or `nack`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn push(&self, queue: QueueName, task: Task) -> Result<()>;

    async fn pop(&self, queue: QueueName) -> Result<Option<Task>>;

    /// The task completed.
    async fn ack(&self, queue: QueueName, task: &Task) -> Result<()>;

    /// The task failed; requeue it unless it is out of attempts.
    async fn nack(&self, queue: QueueName, task: &Task) -> Result<NackOutcome>;

    /// The task can never succeed; park it as failed without another attempt.
    async fn dead_letter(&self, queue: QueueName, task: &Task) -> Result<()>;

    async fn stats(&self, queue: QueueName) -> Result<QueueStats>;
}
