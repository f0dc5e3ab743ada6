//! Courier boundary: hands materialized messages to the delivery service.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use switchyard_core::Result;
use switchyard_db::msgs::Msg;
use switchyard_queue::{Broker, Priority, QueueName, Task, TaskPayload};

#[async_trait]
pub trait Courier: Send + Sync {
    async fn queue_messages(&self, msgs: &[Msg]) -> Result<()>;
}

/// Body of the `send_msgs` task read by the delivery service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMsgsTask {
    pub msgs: Vec<Msg>,
}

impl TaskPayload for SendMsgsTask {
    const TASK_TYPE: &'static str = "send_msgs";
}

/// Courier that pushes `send_msgs` tasks onto the courier queue.
pub struct BrokerCourier {
    broker: Arc<dyn Broker>,
}

impl BrokerCourier {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Courier for BrokerCourier {
    async fn queue_messages(&self, msgs: &[Msg]) -> Result<()> {
        let Some(first) = msgs.first() else {
            return Ok(());
        };
        let payload = SendMsgsTask { msgs: msgs.to_vec() };
        let task = Task::from_payload(first.org_id, Priority::Default, &payload)?;
        self.broker.push(QueueName::Courier, task).await?;
        tracing::debug!("📮 {} messages handed to courier (org {})", msgs.len(), first.org_id);
        Ok(())
    }
}
