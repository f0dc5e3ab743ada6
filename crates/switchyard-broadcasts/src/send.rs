//! `send_broadcast_batch`: turn one batch into messages for the courier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use switchyard_core::{BroadcastId, Result};
use switchyard_db::broadcasts::mark_broadcast_sent;
use switchyard_db::contacts::{Contact, ContactStatus, load_contacts};
use switchyard_db::msgs::{NewMsg, delete_msgs, insert_msgs};
use switchyard_db::Database;
use switchyard_db::orgs::load_org;
use switchyard_queue::{Task, TaskHandler};

use crate::courier::Courier;
use crate::fanout::{BROADCAST_DEADLINE, BroadcastBatch};

/// Marks the broadcast sent when dropped, whatever the batch outcome.
struct MarkSentGuard {
    db: Arc<Database>,
    broadcast_id: BroadcastId,
}

impl Drop for MarkSentGuard {
    fn drop(&mut self) {
        match self.db.with_conn(|conn| mark_broadcast_sent(conn, self.broadcast_id)) {
            Ok(()) => tracing::info!("✅ Broadcast {} sent", self.broadcast_id),
            Err(e) => tracing::error!("❌ Cannot mark broadcast {} sent: {}", self.broadcast_id, e),
        }
    }
}

/// Messages for the contacts of `batch`. Contacts that are not active or
/// have nowhere to send to are skipped.
pub fn build_messages(
    batch: &BroadcastBatch,
    contacts: &[Contact],
    default_language: Option<&str>,
) -> Vec<NewMsg> {
    let mut msgs = Vec::with_capacity(contacts.len());
    for contact in contacts {
        if contact.status != ContactStatus::Active {
            tracing::debug!("Skipping contact {}: not active", contact.id);
            continue;
        }
        let Some(urn) = batch.urn_for(contact.id).or_else(|| contact.preferred_urn()) else {
            tracing::debug!("Skipping contact {}: no URN", contact.id);
            continue;
        };

        let language = contact
            .language
            .as_deref()
            .filter(|lang| batch.has_language(lang))
            .or(default_language);
        msgs.push(NewMsg {
            org_id: batch.org_id,
            contact_id: contact.id,
            broadcast_id: Some(batch.broadcast_id),
            urn: urn.clone(),
            text: batch.text_for(language).to_string(),
        });
    }
    msgs
}

pub struct SendBroadcastBatchHandler {
    db: Arc<Database>,
    courier: Arc<dyn Courier>,
}

impl SendBroadcastBatchHandler {
    pub fn new(db: Arc<Database>, courier: Arc<dyn Courier>) -> Self {
        Self { db, courier }
    }

    /// Send one batch. Returns the number of messages handed to the courier.
    ///
    /// Contacts that already have a message for the broadcast are skipped,
    /// so a redelivered batch only sends what the earlier run did not.
    pub async fn send(&self, batch: &BroadcastBatch) -> Result<usize> {
        let _guard = batch.is_last.then(|| MarkSentGuard {
            db: self.db.clone(),
            broadcast_id: batch.broadcast_id,
        });

        let msgs = self.db.transaction(|tx| {
            let org = load_org(tx, batch.org_id)?;
            let contacts = load_contacts(tx, batch.org_id, &batch.contact_ids)?;
            let new = build_messages(batch, &contacts, org.default_language.as_deref());
            insert_msgs(tx, &new, Utc::now())
        })?;

        if let Err(e) = self.courier.queue_messages(&msgs).await {
            tracing::error!(
                "❌ Courier rejected {} messages of broadcast {} (org {}): {}",
                msgs.len(),
                batch.broadcast_id,
                batch.org_id,
                e
            );
            // Unsent rows would make the retry skip these contacts
            let ids: Vec<_> = msgs.iter().map(|m| m.id).collect();
            if let Err(undo) = self.db.with_conn(|conn| delete_msgs(conn, &ids)) {
                tracing::error!(
                    "❌ Cannot remove {} unsent messages of broadcast {} (org {}): {}",
                    ids.len(),
                    batch.broadcast_id,
                    batch.org_id,
                    undo
                );
            }
            return Err(e);
        }
        tracing::info!(
            "📨 Broadcast {} batch: {} messages for {} contacts (org {})",
            batch.broadcast_id,
            msgs.len(),
            batch.contact_ids.len(),
            batch.org_id
        );
        Ok(msgs.len())
    }
}

#[async_trait]
impl TaskHandler for SendBroadcastBatchHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        let batch: BroadcastBatch = task.decode()?;
        self.send(&batch).await.map(|_| ())
    }

    fn deadline(&self) -> Option<Duration> {
        Some(BROADCAST_DEADLINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use switchyard_core::{ContactId, OrgId, SwitchyardError, Urn};
    use switchyard_db::broadcasts::{BroadcastStatus, NewBroadcast, create_broadcast, load_broadcast};
    use switchyard_db::contacts::{add_urn, create_contact, set_contact_status};
    use switchyard_db::msgs::{Msg, load_broadcast_msgs};
    use switchyard_db::orgs::create_org;

    use crate::fanout::UrnOverride;

    #[derive(Default)]
    struct FakeCourier {
        sent: Mutex<Vec<Msg>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Courier for FakeCourier {
        async fn queue_messages(&self, msgs: &[Msg]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SwitchyardError::Courier("courier down".into()));
            }
            self.sent.lock().unwrap().extend_from_slice(msgs);
            Ok(())
        }
    }

    struct Setup {
        db: Arc<Database>,
        org: OrgId,
        broadcast: BroadcastId,
        /// eng speaker with two URNs
        ann: ContactId,
        /// fra speaker
        bob: ContactId,
        /// spa speaker, falls back to the org language
        cat: ContactId,
        /// no URN
        eve: ContactId,
        /// blocked
        dan: ContactId,
    }

    fn setup() -> Setup {
        let db = Database::open_in_memory().unwrap();
        let ids = db
            .transaction(|c| {
                let org = create_org(c, "Nyaruka", "UTC", Some("kin"))?;
                let ann = create_contact(c, org, Some("Ann"), Some("eng"), Utc::now())?;
                add_urn(c, org, ann, &Urn::new("tel:+250788000001"), 1000)?;
                add_urn(c, org, ann, &Urn::new("telegram:11"), 500)?;
                let bob = create_contact(c, org, Some("Bob"), Some("fra"), Utc::now())?;
                add_urn(c, org, bob, &Urn::new("tel:+250788000002"), 1000)?;
                let cat = create_contact(c, org, Some("Cat"), Some("spa"), Utc::now())?;
                add_urn(c, org, cat, &Urn::new("tel:+250788000003"), 1000)?;
                let eve = create_contact(c, org, Some("Eve"), None, Utc::now())?;
                let dan = create_contact(c, org, Some("Dan"), None, Utc::now())?;
                add_urn(c, org, dan, &Urn::new("tel:+250788000004"), 1000)?;
                set_contact_status(c, dan, ContactStatus::Blocked)?;
                let broadcast = create_broadcast(
                    c,
                    &NewBroadcast {
                        org_id: org,
                        text: "Hello".into(),
                        base_language: "eng".into(),
                        translations: HashMap::from([
                            ("fra".to_string(), "Bonjour".to_string()),
                            ("kin".to_string(), "Muraho".to_string()),
                        ]),
                        contact_ids: vec![ann, bob, cat, dan, eve],
                        group_ids: vec![],
                        urns: vec![],
                    },
                )?;
                Ok((org, broadcast, [ann, bob, cat, dan, eve]))
            })
            .unwrap();
        let (org, broadcast, [ann, bob, cat, dan, eve]) = ids;
        Setup {
            db: Arc::new(db),
            org,
            broadcast,
            ann,
            bob,
            cat,
            dan,
            eve,
        }
    }

    fn batch(s: &Setup, contact_ids: Vec<ContactId>, urns: Vec<UrnOverride>, is_last: bool) -> BroadcastBatch {
        BroadcastBatch {
            broadcast_id: s.broadcast,
            org_id: s.org,
            contact_ids,
            urns,
            is_last,
            text: "Hello".into(),
            base_language: "eng".into(),
            translations: HashMap::from([
                ("fra".to_string(), "Bonjour".to_string()),
                ("kin".to_string(), "Muraho".to_string()),
            ]),
        }
    }

    fn status(s: &Setup) -> BroadcastStatus {
        s.db.with_conn(|c| load_broadcast(c, s.broadcast)).unwrap().status
    }

    #[tokio::test]
    async fn test_batch_builds_messages() {
        let s = setup();
        let courier = Arc::new(FakeCourier::default());
        let handler = SendBroadcastBatchHandler::new(s.db.clone(), courier.clone());
        let overrides = vec![UrnOverride {
            contact_id: s.ann,
            urn: Urn::new("telegram:11"),
        }];
        let batch = batch(&s, vec![s.ann, s.bob, s.cat, s.dan, s.eve], overrides, false);

        assert_eq!(handler.send(&batch).await.unwrap(), 3);
        let sent = courier.sent.lock().unwrap().clone();
        let got: Vec<(ContactId, &str, &str)> = sent
            .iter()
            .map(|m| (m.contact_id, m.urn.as_str(), m.text.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (s.ann, "telegram:11", "Hello"),
                (s.bob, "tel:+250788000002", "Bonjour"),
                (s.cat, "tel:+250788000003", "Muraho"),
            ]
        );
        assert_eq!(status(&s), BroadcastStatus::Pending);
        assert_eq!(
            s.db.with_conn(|c| load_broadcast_msgs(c, s.broadcast)).unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_terminal_batch_marks_sent_even_on_failure() {
        let s = setup();
        let courier = Arc::new(FakeCourier {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        });
        let handler = SendBroadcastBatchHandler::new(s.db.clone(), courier);
        let batch = batch(&s, vec![s.bob], vec![], true);

        let err = handler.send(&batch).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::Courier(_)));
        assert_eq!(status(&s), BroadcastStatus::Sent);
        assert!(s.db.with_conn(|c| load_broadcast_msgs(c, s.broadcast)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_batch_sends_once() {
        let s = setup();
        let courier = Arc::new(FakeCourier::default());
        let handler = SendBroadcastBatchHandler::new(s.db.clone(), courier.clone());
        let batch = batch(&s, vec![s.ann, s.bob], vec![], true);

        assert_eq!(handler.send(&batch).await.unwrap(), 2);
        assert_eq!(handler.send(&batch).await.unwrap(), 0);

        assert_eq!(courier.sent.lock().unwrap().len(), 2);
        assert_eq!(
            s.db.with_conn(|c| load_broadcast_msgs(c, s.broadcast)).unwrap().len(),
            2
        );
        assert_eq!(status(&s), BroadcastStatus::Sent);
    }

    #[tokio::test]
    async fn test_batch_retried_after_courier_failure_sends() {
        let s = setup();
        let courier = Arc::new(FakeCourier::default());
        courier.fail.store(true, Ordering::SeqCst);
        let handler = SendBroadcastBatchHandler::new(s.db.clone(), courier.clone());
        let batch = batch(&s, vec![s.bob], vec![], true);

        assert!(handler.send(&batch).await.is_err());
        // already marked sent by the first attempt, the retry still delivers
        assert_eq!(status(&s), BroadcastStatus::Sent);

        courier.fail.store(false, Ordering::SeqCst);
        assert_eq!(handler.send(&batch).await.unwrap(), 1);
        let sent = courier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].contact_id, s.bob);
        assert_eq!(
            s.db.with_conn(|c| load_broadcast_msgs(c, s.broadcast)).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_empty_terminal_batch_marks_sent() {
        let s = setup();
        let handler = SendBroadcastBatchHandler::new(s.db.clone(), Arc::new(FakeCourier::default()));
        let batch = batch(&s, vec![], vec![], true);
        assert_eq!(handler.send(&batch).await.unwrap(), 0);
        assert_eq!(status(&s), BroadcastStatus::Sent);
    }
}
