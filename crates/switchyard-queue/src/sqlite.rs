//! SQLite-backed broker for crash-safe task processing.
//!
//! A popped task is leased: it moves to `processing` with a `locked_until`
//! deadline. If the worker dies the lease expires and the next `pop` on that
//! queue reclaims it, counting the lost run as an attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use switchyard_core::{OrgId, Result, SwitchyardError};
use switchyard_db::Database;
use switchyard_db::timestamps::{format_ts, ts_column};

use crate::broker::{Broker, NackOutcome, QueueStats};
use crate::task::{Priority, QueueName, Task};

/// Durable broker sharing the application database.
pub struct SqliteBroker {
    db: Arc<Database>,
    lease: Duration,
    max_attempts: u32,
}

impl SqliteBroker {
    pub fn new(db: Arc<Database>, lease: Duration, max_attempts: u32) -> Self {
        Self {
            db,
            lease,
            max_attempts: max_attempts.max(1),
        }
    }

    fn lease_until(&self) -> Result<String> {
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| SwitchyardError::Queue(format!("invalid lease: {e}")))?;
        Ok(format_ts(Utc::now() + lease))
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn push(&self, queue: QueueName, task: Task) -> Result<()> {
        let now = format_ts(Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue_tasks
                    (id, queue, task_type, org_id, priority, body, status, attempts, max_attempts, queued_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9, ?10)",
                params![
                    task.id,
                    queue.as_str(),
                    task.task_type,
                    task.org_id,
                    task.priority.rank(),
                    task.body,
                    task.attempts,
                    self.max_attempts,
                    format_ts(task.queued_at),
                    now
                ],
            )?;
            Ok(())
        })?;
        tracing::debug!("📥 Queue[{}] push: {} {}", queue, task.task_type, task.id);
        Ok(())
    }

    async fn pop(&self, queue: QueueName) -> Result<Option<Task>> {
        let locked_until = self.lease_until()?;
        let now = format_ts(Utc::now());

        let (reclaimed, task) = self.db.transaction(|tx| {
            // Expired leases: the worker is gone, count the lost run
            let reclaimed = tx.execute(
                "UPDATE queue_tasks SET
                    status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                    attempts = attempts + 1,
                    locked_until = NULL,
                    updated_at = ?2
                 WHERE queue = ?1 AND status = 'processing' AND locked_until < ?2",
                params![queue.as_str(), now],
            )?;

            let task = tx
                .query_row(
                    "SELECT id, task_type, org_id, priority, body, attempts, queued_at
                     FROM queue_tasks
                     WHERE queue = ?1 AND status = 'pending'
                     ORDER BY priority DESC, seq ASC
                     LIMIT 1",
                    params![queue.as_str()],
                    |row| {
                        Ok(Task {
                            id: row.get(0)?,
                            task_type: row.get(1)?,
                            org_id: row.get::<_, OrgId>(2)?,
                            priority: Priority::from_rank(row.get(3)?),
                            body: row.get(4)?,
                            attempts: row.get(5)?,
                            queued_at: ts_column(row, 6)?,
                        })
                    },
                )
                .optional()?;

            if let Some(task) = &task {
                tx.execute(
                    "UPDATE queue_tasks SET status = 'processing', locked_until = ?1, updated_at = ?2
                     WHERE id = ?3",
                    params![locked_until, now, task.id],
                )?;
            }
            Ok((reclaimed, task))
        })?;

        if reclaimed > 0 {
            tracing::warn!("⏰ Queue[{}] reclaimed {} tasks with expired leases", queue, reclaimed);
        }
        Ok(task)
    }

    async fn ack(&self, _queue: QueueName, task: &Task) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE queue_tasks SET status = 'completed', locked_until = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![format_ts(Utc::now()), task.id],
            )?;
            Ok(())
        })
    }

    async fn nack(&self, queue: QueueName, task: &Task) -> Result<NackOutcome> {
        let now = format_ts(Utc::now());
        let outcome = self.db.transaction(|tx| {
            let row: Option<(u32, u32)> = tx
                .query_row(
                    "SELECT attempts, max_attempts FROM queue_tasks WHERE id = ?1",
                    params![task.id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (attempts, max_attempts) = row
                .ok_or_else(|| SwitchyardError::Queue(format!("task {} not found", task.id)))?;

            let attempts = attempts + 1;
            let (status, outcome) = if attempts >= max_attempts {
                ("failed", NackOutcome::DeadLettered)
            } else {
                ("pending", NackOutcome::Requeued)
            };
            tx.execute(
                "UPDATE queue_tasks SET status = ?1, attempts = ?2, locked_until = NULL, updated_at = ?3
                 WHERE id = ?4",
                params![status, attempts, now, task.id],
            )?;
            Ok(outcome)
        })?;

        if outcome == NackOutcome::DeadLettered {
            tracing::warn!("💀 Queue[{}] dead-lettered {} {}", queue, task.task_type, task.id);
        }
        Ok(outcome)
    }

    async fn dead_letter(&self, queue: QueueName, task: &Task) -> Result<()> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE queue_tasks SET status = 'failed', attempts = attempts + 1, locked_until = NULL,
                 updated_at = ?1 WHERE id = ?2",
                params![format_ts(Utc::now()), task.id],
            )?)
        })?;
        if updated == 0 {
            return Err(SwitchyardError::Queue(format!("task {} not found", task.id)));
        }
        tracing::warn!("💀 Queue[{}] dead-lettered {} {}", queue, task.task_type, task.id);
        Ok(())
    }

    async fn stats(&self, queue: QueueName) -> Result<QueueStats> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM queue_tasks WHERE queue = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![queue.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row?;
                let count = usize::try_from(count).unwrap_or(0);
                match status.as_str() {
                    "pending" => stats.queued = count,
                    "processing" => stats.in_flight = count,
                    "failed" => {
                        stats.dead = count;
                        stats.total_processed += count as u64;
                    }
                    "completed" => stats.total_processed += count as u64,
                    _ => {}
                }
            }
            Ok(stats)
        })
    }
}
