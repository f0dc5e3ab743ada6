//! Flow-start boundary.
//!
//! The flow engine lives elsewhere; campaign fires only ask it to start a
//! flow for a set of contacts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use switchyard_core::{CampaignEventId, ContactId, FlowId, OrgId, Result, SwitchyardError};
use switchyard_db::Database;
use switchyard_db::campaigns::{CampaignEvent, StartMode};
use switchyard_db::contacts::contacts_with_active_sessions;
use switchyard_queue::{Broker, Priority, QueueName, Task, TaskPayload};

/// Starts flows for contacts.
#[async_trait]
pub trait FlowStarter: Send + Sync {
    /// Start the event's flow for `contacts`. Returns the contacts that were
    /// actually started; the rest were skipped.
    async fn start_flow(
        &self,
        org_id: OrgId,
        event: &CampaignEvent,
        contacts: &[ContactId],
    ) -> Result<Vec<ContactId>>;
}

/// Body of the `start_flow` task consumed by the flow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartFlowTask {
    pub flow_id: FlowId,
    pub contact_ids: Vec<ContactId>,
    pub campaign_event_id: CampaignEventId,
    /// Interrupt whatever flow the contacts are in.
    pub interrupt: bool,
}

impl TaskPayload for StartFlowTask {
    const TASK_TYPE: &'static str = "start_flow";
}

/// Starter that queues a `start_flow` task on the batch queue.
///
/// Honours start mode skip by filtering out contacts with a waiting session.
pub struct QueuedFlowStarter {
    db: Arc<Database>,
    broker: Arc<dyn Broker>,
}

impl QueuedFlowStarter {
    pub fn new(db: Arc<Database>, broker: Arc<dyn Broker>) -> Self {
        Self { db, broker }
    }
}

#[async_trait]
impl FlowStarter for QueuedFlowStarter {
    async fn start_flow(
        &self,
        org_id: OrgId,
        event: &CampaignEvent,
        contacts: &[ContactId],
    ) -> Result<Vec<ContactId>> {
        let flow_id = event.flow_id.ok_or_else(|| {
            SwitchyardError::FlowStart(format!("event {} has no flow", event.id))
        })?;

        let started: Vec<ContactId> = if event.start_mode == StartMode::Skip {
            let busy = self
                .db
                .with_conn(|conn| contacts_with_active_sessions(conn, org_id, contacts))?;
            contacts.iter().copied().filter(|c| !busy.contains(c)).collect()
        } else {
            contacts.to_vec()
        };

        if started.is_empty() {
            return Ok(started);
        }

        let payload = StartFlowTask {
            flow_id,
            contact_ids: started.clone(),
            campaign_event_id: event.id,
            interrupt: event.start_mode == StartMode::Interrupt,
        };
        let task = Task::from_payload(org_id, Priority::Default, &payload)?;
        self.broker.push(QueueName::Batch, task).await?;
        tracing::info!(
            "🚀 Queued flow {} start for {} contacts (event {}, org {})",
            flow_id,
            started.len(),
            event.id,
            org_id
        );
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use switchyard_db::OrgAssets;
    use switchyard_queue::MemoryBroker;

    use crate::lifecycle::tests::fixture;

    #[tokio::test]
    async fn test_skip_mode_filters_active_sessions() {
        let f = fixture(StartMode::Skip);
        f.db.with_conn(|c| {
            c.execute(
                "INSERT INTO flow_sessions (org_id, contact_id, status) VALUES (?1, ?2, 'W')",
                params![f.org, f.contact],
            )?;
            Ok(())
        })
        .unwrap();
        let assets = f.db.with_conn(|c| OrgAssets::load(c, f.org)).unwrap();
        let (_, event) = assets.campaigns.event(f.due_event).unwrap();

        let db = Arc::new(f.db);
        let broker = Arc::new(MemoryBroker::default());
        let starter = QueuedFlowStarter::new(db, broker.clone());

        let started = starter
            .start_flow(f.org, event, &[f.contact, ContactId(999)])
            .await
            .unwrap();
        assert_eq!(started, vec![ContactId(999)]);

        let task = broker.pop(QueueName::Batch).await.unwrap().unwrap();
        let body: StartFlowTask = task.decode().unwrap();
        assert_eq!(body.contact_ids, vec![ContactId(999)]);
        assert!(!body.interrupt);
    }

    #[tokio::test]
    async fn test_interrupt_mode_starts_everyone() {
        let f = fixture(StartMode::Interrupt);
        let assets = f.db.with_conn(|c| OrgAssets::load(c, f.org)).unwrap();
        let (_, event) = assets.campaigns.event(f.due_event).unwrap();
        let broker = Arc::new(MemoryBroker::default());
        let starter = QueuedFlowStarter::new(Arc::new(f.db), broker.clone());

        let started = starter.start_flow(f.org, event, &[f.contact]).await.unwrap();
        assert_eq!(started, vec![f.contact]);
        let task = broker.pop(QueueName::Batch).await.unwrap().unwrap();
        assert_eq!(task.task_type, "start_flow");
        assert!(task.decode::<StartFlowTask>().unwrap().interrupt);
    }
}
