//! `fire_campaign_event` task: hand a batch of due fires to the flow starter.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use switchyard_core::{CampaignEventId, ContactId, FireId, OrgId, Result};
use switchyard_db::fires::{FiredResult, load_event_fires, mark_events_fired};
use switchyard_db::{Database, OrgAssets};
use switchyard_queue::{Task, TaskHandler, TaskPayload};

use crate::poller::FireMarker;
use crate::starter::FlowStarter;

/// Due fires of one event, queued by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireCampaignEventTask {
    pub org_id: OrgId,
    pub event_id: CampaignEventId,
    pub fire_ids: Vec<FireId>,
}

impl TaskPayload for FireCampaignEventTask {
    const TASK_TYPE: &'static str = "fire_campaign_event";
}

pub struct FireCampaignEventHandler {
    db: Arc<Database>,
    starter: Arc<dyn FlowStarter>,
    marker: Arc<FireMarker>,
}

impl FireCampaignEventHandler {
    pub fn new(db: Arc<Database>, starter: Arc<dyn FlowStarter>, marker: Arc<FireMarker>) -> Self {
        Self { db, starter, marker }
    }

    /// Fire what is still unfired among `task.fire_ids`. Returns how many
    /// contacts were started.
    pub async fn fire(&self, task: &FireCampaignEventTask) -> Result<usize> {
        let (fires, assets) = self.db.with_conn(|conn| {
            let fires = load_event_fires(conn, &task.fire_ids)?;
            let assets = OrgAssets::load(conn, task.org_id)?;
            Ok((fires, assets))
        })?;
        if fires.is_empty() {
            tracing::debug!("🔕 Fires of event {} already handled", task.event_id);
            return Ok(0);
        }

        let Some((_, event)) = assets.campaigns.event(task.event_id) else {
            let ids: Vec<FireId> = fires.iter().map(|f| f.id).collect();
            self.db
                .transaction(|tx| mark_events_fired(tx, &ids, Utc::now(), FiredResult::Skipped))?;
            tracing::info!(
                "🔕 Event {} is gone, skipped {} fires (org {})",
                task.event_id,
                ids.len(),
                task.org_id
            );
            return Ok(0);
        };

        let contacts: Vec<ContactId> = fires.iter().map(|f| f.contact_id).collect();
        let started: HashSet<ContactId> = self
            .starter
            .start_flow(task.org_id, event, &contacts)
            .await?
            .into_iter()
            .collect();

        let (fired, skipped): (Vec<_>, Vec<_>) = fires.iter().partition(|f| started.contains(&f.contact_id));
        let fired: Vec<FireId> = fired.into_iter().map(|f| f.id).collect();
        let skipped: Vec<FireId> = skipped.into_iter().map(|f| f.id).collect();

        let now = Utc::now();
        self.db.transaction(|tx| {
            mark_events_fired(tx, &fired, now, FiredResult::Fired)?;
            mark_events_fired(tx, &skipped, now, FiredResult::Skipped)
        })?;

        tracing::info!(
            "🔥 Event {} fired for {} contacts, {} skipped (org {})",
            task.event_id,
            fired.len(),
            skipped.len(),
            task.org_id
        );
        Ok(fired.len())
    }
}

#[async_trait]
impl TaskHandler for FireCampaignEventHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        let body: FireCampaignEventTask = task.decode()?;
        self.fire(&body).await?;
        // A failed task keeps its fires marked until redelivery or the TTL
        self.marker.release(&body.fire_ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use std::sync::Mutex;
    use std::time::Duration;
    use switchyard_db::campaigns::{CampaignEvent, StartMode};
    use switchyard_db::contacts::load_contacts;
    use switchyard_db::fires::load_contact_fires;
    use switchyard_core::SwitchyardError;
    use switchyard_queue::{Broker, MemoryBroker, QueueName};

    use crate::lifecycle::reschedule_contact_fires;
    use crate::lifecycle::tests::{fixture, now};
    use crate::poller::FirePoller;

    /// Starts only the contacts it is told to.
    struct Recording {
        allow: HashSet<ContactId>,
        calls: Mutex<Vec<(CampaignEventId, Vec<ContactId>)>>,
    }

    #[async_trait]
    impl FlowStarter for Recording {
        async fn start_flow(
            &self,
            _org_id: OrgId,
            event: &CampaignEvent,
            contacts: &[ContactId],
        ) -> Result<Vec<ContactId>> {
            self.calls.lock().unwrap().push((event.id, contacts.to_vec()));
            Ok(contacts.iter().copied().filter(|c| self.allow.contains(c)).collect())
        }
    }

    struct EngineDown;

    #[async_trait]
    impl FlowStarter for EngineDown {
        async fn start_flow(
            &self,
            _org_id: OrgId,
            _event: &CampaignEvent,
            _contacts: &[ContactId],
        ) -> Result<Vec<ContactId>> {
            Err(SwitchyardError::FlowStart("engine down".into()))
        }
    }

    fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_poll_then_fire() {
        let f = fixture(StartMode::Interrupt);
        f.db.transaction(|tx| {
            let assets = OrgAssets::load(tx, f.org)?;
            let contacts = load_contacts(tx, f.org, &[f.contact])?;
            reschedule_contact_fires(tx, &assets, now(), &contacts, None)
        })
        .unwrap();
        let contact = f.contact;
        let db = Arc::new(f.db);

        let broker = Arc::new(MemoryBroker::default());
        let marker = Arc::new(FireMarker::new(Duration::from_secs(3_600)));
        let poller = FirePoller::new(db.clone(), broker.clone(), marker.clone(), 100);

        assert_eq!(poller.poll_once(later()).await.unwrap(), 2);
        assert_eq!(poller.poll_once(later()).await.unwrap(), 0);
        assert_eq!(marker.len(), 2);

        let starter = Arc::new(Recording {
            allow: HashSet::from([contact]),
            calls: Mutex::new(Vec::new()),
        });
        let handler = FireCampaignEventHandler::new(db.clone(), starter.clone(), marker.clone());
        while let Some(task) = broker.pop(QueueName::Batch).await.unwrap() {
            assert_eq!(task.task_type, FireCampaignEventTask::TASK_TYPE);
            handler.handle(&task).await.unwrap();
            broker.ack(QueueName::Batch, &task).await.unwrap();
        }

        assert_eq!(starter.calls.lock().unwrap().len(), 2);
        assert!(marker.is_empty());
        let fires = db.with_conn(|c| load_contact_fires(c, contact)).unwrap();
        assert_eq!(fires.len(), 2);
        assert!(fires.iter().all(|f| f.fired_result == Some(FiredResult::Fired)));

        assert_eq!(poller.poll_once(later()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unstarted_contacts_are_skipped() {
        let f = fixture(StartMode::Skip);
        f.db.transaction(|tx| {
            let assets = OrgAssets::load(tx, f.org)?;
            let contacts = load_contacts(tx, f.org, &[f.contact])?;
            reschedule_contact_fires(tx, &assets, now(), &contacts, None)
        })
        .unwrap();
        let fire_ids: Vec<FireId> = f
            .db
            .with_conn(|c| load_contact_fires(c, f.contact))
            .unwrap()
            .into_iter()
            .filter(|fire| fire.event_id == f.due_event)
            .map(|fire| fire.id)
            .collect();

        let db = Arc::new(f.db);
        let starter = Arc::new(Recording {
            allow: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        });
        let handler = FireCampaignEventHandler::new(
            db.clone(),
            starter,
            Arc::new(FireMarker::new(Duration::from_secs(60))),
        );
        let started = handler
            .fire(&FireCampaignEventTask {
                org_id: f.org,
                event_id: f.due_event,
                fire_ids: fire_ids.clone(),
            })
            .await
            .unwrap();
        assert_eq!(started, 0);

        let fires = db.with_conn(|c| load_contact_fires(c, f.contact)).unwrap();
        let due = fires.iter().find(|fire| fire.id == fire_ids[0]).unwrap();
        assert_eq!(due.fired_result, Some(FiredResult::Skipped));
    }

    #[tokio::test]
    async fn test_deleted_event_skips_fires() {
        let f = fixture(StartMode::Interrupt);
        f.db.transaction(|tx| {
            let assets = OrgAssets::load(tx, f.org)?;
            let contacts = load_contacts(tx, f.org, &[f.contact])?;
            reschedule_contact_fires(tx, &assets, now(), &contacts, None)?;
            tx.execute("UPDATE campaign_events SET is_active = 0", [])?;
            Ok(())
        })
        .unwrap();
        let fire_ids: Vec<FireId> = f
            .db
            .with_conn(|c| load_contact_fires(c, f.contact))
            .unwrap()
            .into_iter()
            .map(|fire| fire.id)
            .collect();

        let db = Arc::new(f.db);
        let starter = Arc::new(Recording {
            allow: HashSet::from([f.contact]),
            calls: Mutex::new(Vec::new()),
        });
        let handler = FireCampaignEventHandler::new(
            db.clone(),
            starter.clone(),
            Arc::new(FireMarker::new(Duration::from_secs(60))),
        );
        handler
            .fire(&FireCampaignEventTask {
                org_id: f.org,
                event_id: f.due_event,
                fire_ids,
            })
            .await
            .unwrap();

        assert!(starter.calls.lock().unwrap().is_empty());
        let fires = db.with_conn(|c| load_contact_fires(c, f.contact)).unwrap();
        assert!(fires.iter().all(|fire| fire.fired_result == Some(FiredResult::Skipped)));
    }

    #[tokio::test]
    async fn test_failed_fire_keeps_marker() {
        let f = fixture(StartMode::Interrupt);
        f.db.transaction(|tx| {
            let assets = OrgAssets::load(tx, f.org)?;
            let contacts = load_contacts(tx, f.org, &[f.contact])?;
            reschedule_contact_fires(tx, &assets, now(), &contacts, None)
        })
        .unwrap();
        let contact = f.contact;
        let db = Arc::new(f.db);

        let broker = Arc::new(MemoryBroker::default());
        let marker = Arc::new(FireMarker::new(Duration::from_secs(3_600)));
        let poller = FirePoller::new(db.clone(), broker.clone(), marker.clone(), 100);
        assert_eq!(poller.poll_once(later()).await.unwrap(), 2);

        let handler = FireCampaignEventHandler::new(db.clone(), Arc::new(EngineDown), marker.clone());
        let task = broker.pop(QueueName::Batch).await.unwrap().unwrap();
        let err = handler.handle(&task).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::FlowStart(_)));

        // the redelivered task owns these fires, the poller must not queue them again
        assert_eq!(marker.len(), 2);
        assert_eq!(poller.poll_once(later()).await.unwrap(), 0);
        let fires = db.with_conn(|c| load_contact_fires(c, contact)).unwrap();
        assert!(fires.iter().all(|f| f.fired.is_none()));
    }

    #[tokio::test]
    async fn test_poller_pages_past_marked_fires() {
        let f = fixture(StartMode::Interrupt);
        f.db.transaction(|tx| {
            let assets = OrgAssets::load(tx, f.org)?;
            let contacts = load_contacts(tx, f.org, &[f.contact])?;
            reschedule_contact_fires(tx, &assets, now(), &contacts, None)
        })
        .unwrap();
        let (created_event, due_event) = (f.created_event, f.due_event);
        let db = Arc::new(f.db);

        let broker = Arc::new(MemoryBroker::default());
        let marker = Arc::new(FireMarker::new(Duration::from_secs(3_600)));
        let poller = FirePoller::new(db.clone(), broker.clone(), marker.clone(), 1);

        // oldest first: the created_on fire, then the due date one
        assert_eq!(poller.poll_once(later()).await.unwrap(), 1);
        assert_eq!(poller.poll_once(later()).await.unwrap(), 1);
        assert_eq!(poller.poll_once(later()).await.unwrap(), 0);

        let mut events = Vec::new();
        while let Some(task) = broker.pop(QueueName::Batch).await.unwrap() {
            events.push(task.decode::<FireCampaignEventTask>().unwrap().event_id);
        }
        assert_eq!(events, vec![created_event, due_event]);
    }
}
