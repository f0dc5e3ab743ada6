//! Worker loops: pop → dispatch → ack/nack.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use switchyard_core::{Result, SwitchyardError};

use crate::broker::{Broker, NackOutcome};
use crate::dispatch::Dispatcher;
use crate::task::QueueName;

/// Shared pieces every worker of a pool needs.
#[derive(Clone)]
pub struct WorkerConfig {
    pub broker: Arc<dyn Broker>,
    pub dispatcher: Arc<Dispatcher>,
    /// Sleep after an empty poll.
    pub idle_sleep: Duration,
}

/// Pop and run one task. Returns `false` when the queue was empty.
///
/// Handler failures are logged and the task is handed back to the broker.
/// Tasks of an unregistered type are dead-lettered at once. Only broker
/// failures surface as `Err`.
pub async fn process_next(queue: QueueName, broker: &dyn Broker, dispatcher: &Dispatcher) -> Result<bool> {
    let Some(task) = broker.pop(queue).await? else {
        return Ok(false);
    };

    match dispatcher.dispatch(&task).await {
        Ok(()) => {
            tracing::debug!(
                "✅ Queue[{}] {} {} done (org {})",
                queue,
                task.task_type,
                task.id,
                task.org_id
            );
            broker.ack(queue, &task).await?;
        }
        Err(SwitchyardError::UnknownTaskType(task_type)) => {
            tracing::error!(
                "❌ Queue[{}] no handler for task type '{}', dropping {} (org {})",
                queue,
                task_type,
                task.id,
                task.org_id
            );
            broker.dead_letter(queue, &task).await?;
        }
        Err(e) => {
            tracing::error!(
                "❌ Queue[{}] {} {} failed (org {}, attempt {}): {}",
                queue,
                task.task_type,
                task.id,
                task.org_id,
                task.attempts + 1,
                e
            );
            if broker.nack(queue, &task).await? == NackOutcome::DeadLettered {
                tracing::error!("💀 Task {} will not be retried", task.id);
            }
        }
    }
    Ok(true)
}

/// Run one worker until `shutdown` flips to `true`.
pub async fn run_worker(
    worker_id: usize,
    queue: QueueName,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("👷 Worker {} started on queue '{}'", worker_id, queue);
    loop {
        if *shutdown.borrow() {
            break;
        }
        match process_next(queue, config.broker.as_ref(), &config.dispatcher).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => tracing::error!("⚠️ Worker {} broker error on '{}': {}", worker_id, queue, e),
        }
        tokio::select! {
            _ = tokio::time::sleep(config.idle_sleep) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("👋 Worker {} on queue '{}' stopped", worker_id, queue);
}

/// Spawn `count` workers for `queue`.
pub fn spawn_workers(
    queue: QueueName,
    count: usize,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, queue, config.clone(), shutdown.clone())))
        .collect()
}
