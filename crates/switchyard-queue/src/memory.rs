//! In-memory broker: one priority lane pair per queue.
//!
//! Low-latency tasks always pop before default ones; within a lane tasks
//! pop in push order. Nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use switchyard_core::Result;

use crate::broker::{Broker, NackOutcome, QueueStats};
use crate::task::{Priority, QueueName, Task};

/// Per-queue state.
struct QueueState {
    /// Indexed by priority rank.
    lanes: [VecDeque<Task>; 2],
    in_flight: HashMap<String, Task>,
    dead: Vec<Task>,
    total_processed: u64,
}

impl QueueState {
    fn new() -> Self {
        Self {
            lanes: [VecDeque::new(), VecDeque::new()],
            in_flight: HashMap::new(),
            dead: Vec::new(),
            total_processed: 0,
        }
    }

    fn lane_index(priority: Priority) -> usize {
        priority.rank() as usize
    }

    fn enqueue(&mut self, task: Task) {
        self.lanes[Self::lane_index(task.priority)].push_back(task);
    }

    fn dequeue(&mut self) -> Option<Task> {
        // Highest rank first
        let task = self
            .lanes
            .iter_mut()
            .rev()
            .find_map(|lane| lane.pop_front())?;
        self.in_flight.insert(task.id.clone(), task.clone());
        Some(task)
    }

    fn queued(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

/// In-process broker.
pub struct MemoryBroker {
    queues: [Arc<Mutex<QueueState>>; 3],
    max_attempts: u32,
}

impl MemoryBroker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            queues: [
                Arc::new(Mutex::new(QueueState::new())),
                Arc::new(Mutex::new(QueueState::new())),
                Arc::new(Mutex::new(QueueState::new())),
            ],
            max_attempts: max_attempts.max(1),
        }
    }

    fn queue(&self, name: QueueName) -> &Arc<Mutex<QueueState>> {
        &self.queues[name.index()]
    }

    /// Tasks that ran out of attempts.
    pub async fn dead_letters(&self, queue: QueueName) -> Vec<Task> {
        self.queue(queue).lock().await.dead.clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, queue: QueueName, task: Task) -> Result<()> {
        let mut state = self.queue(queue).lock().await;
        tracing::debug!(
            "📥 Queue[{}] push: {} {} (queued: {}, in flight: {})",
            queue,
            task.task_type,
            task.id,
            state.queued(),
            state.in_flight.len()
        );
        state.enqueue(task);
        Ok(())
    }

    async fn pop(&self, queue: QueueName) -> Result<Option<Task>> {
        Ok(self.queue(queue).lock().await.dequeue())
    }

    async fn ack(&self, queue: QueueName, task: &Task) -> Result<()> {
        let mut state = self.queue(queue).lock().await;
        if state.in_flight.remove(&task.id).is_some() {
            state.total_processed += 1;
        }
        Ok(())
    }

    async fn nack(&self, queue: QueueName, task: &Task) -> Result<NackOutcome> {
        let mut state = self.queue(queue).lock().await;
        let mut task = state.in_flight.remove(&task.id).unwrap_or_else(|| task.clone());
        task.attempts += 1;
        state.total_processed += 1;

        if task.attempts >= self.max_attempts {
            tracing::warn!(
                "💀 Queue[{}] dead-lettered {} {} after {} attempts",
                queue,
                task.task_type,
                task.id,
                task.attempts
            );
            state.dead.push(task);
            Ok(NackOutcome::DeadLettered)
        } else {
            state.enqueue(task);
            Ok(NackOutcome::Requeued)
        }
    }

    async fn dead_letter(&self, queue: QueueName, task: &Task) -> Result<()> {
        let mut state = self.queue(queue).lock().await;
        let mut task = state.in_flight.remove(&task.id).unwrap_or_else(|| task.clone());
        task.attempts += 1;
        state.total_processed += 1;
        tracing::warn!("💀 Queue[{}] dead-lettered {} {}", queue, task.task_type, task.id);
        state.dead.push(task);
        Ok(())
    }

    async fn stats(&self, queue: QueueName) -> Result<QueueStats> {
        let state = self.queue(queue).lock().await;
        Ok(QueueStats {
            queued: state.queued(),
            in_flight: state.in_flight.len(),
            dead: state.dead.len(),
            total_processed: state.total_processed,
        })
    }
}
