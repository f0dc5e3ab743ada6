//! Task envelope and queue names.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use switchyard_core::{OrgId, Result};

/// Named queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Low-latency work such as batches of tiny broadcasts.
    Handler,
    /// Bulk work: broadcast fan-out and batches, campaign fires, flow starts.
    Batch,
    /// Outbound messages for the delivery service.
    Courier,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Handler, QueueName::Batch, QueueName::Courier];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Handler => "handler",
            QueueName::Batch => "batch",
            QueueName::Courier => "courier",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            QueueName::Handler => 0,
            QueueName::Batch => 1,
            QueueName::Courier => 2,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority within a queue. Higher priorities are popped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Default,
    LowLatency,
}

impl Priority {
    /// Numeric rank, higher wins.
    pub fn rank(&self) -> i64 {
        match self {
            Priority::Default => 0,
            Priority::LowLatency => 1,
        }
    }

    pub fn from_rank(rank: i64) -> Self {
        if rank > 0 { Priority::LowLatency } else { Priority::Default }
    }
}

/// A typed task body with a fixed task type name.
pub trait TaskPayload: Serialize + DeserializeOwned {
    const TASK_TYPE: &'static str;
}

/// The broker envelope: `{type, org_id, priority, body}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub org_id: OrgId,
    #[serde(default)]
    pub priority: Priority,
    /// JSON encoded body, opaque to the broker.
    pub body: String,
    #[serde(default)]
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
}

impl Task {
    /// Build a task from a raw type name and body.
    pub fn new(task_type: impl Into<String>, org_id: OrgId, priority: Priority, body: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            org_id,
            priority,
            body,
            attempts: 0,
            queued_at: Utc::now(),
        }
    }

    /// Build a task from a typed payload.
    pub fn from_payload<P: TaskPayload>(org_id: OrgId, priority: Priority, payload: &P) -> Result<Self> {
        Ok(Self::new(P::TASK_TYPE, org_id, priority, serde_json::to_string(payload)?))
    }

    /// Decode the body into a typed payload.
    pub fn decode<P: TaskPayload>(&self) -> Result<P> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl TaskPayload for Ping {
        const TASK_TYPE: &'static str = "ping";
    }

    #[test]
    fn test_envelope_shape() {
        let task = Task::from_payload(OrgId(7), Priority::LowLatency, &Ping { n: 3 }).unwrap();
        let json: serde_json::Value = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "ping");
        assert_eq!(json["org_id"], 7);
        assert_eq!(json["priority"], "low_latency");
        assert_eq!(task.decode::<Ping>().unwrap(), Ping { n: 3 });
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::LowLatency > Priority::Default);
        assert_eq!(Priority::from_rank(Priority::LowLatency.rank()), Priority::LowLatency);
    }
}
