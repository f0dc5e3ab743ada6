//! # Switchyard Queue
//!
//! Priority multi-queue task broker abstraction with two backends
//! (in-memory and SQLite) and the worker-side dispatch table.
//!
//! Delivery is at-least-once: a task that fails, times out or whose worker
//! dies is handed out again until it runs out of attempts.

pub mod broker;
pub mod dispatch;
pub mod memory;
pub mod sqlite;
pub mod task;
pub mod worker;

pub use broker::{Broker, NackOutcome, QueueStats};
pub use dispatch::{Dispatcher, TaskHandler};
pub use memory::MemoryBroker;
pub use sqlite::SqliteBroker;
pub use task::{Priority, QueueName, Task, TaskPayload};
pub use worker::{WorkerConfig, process_next, run_worker, spawn_workers};
