//! Broadcast fan-out: resolve recipients and split them into batches.
//!
//! Contacts that were also addressed by URN are held back from the regular
//! batches and sent in the terminal one, where the URN map tells the sender
//! which address to use. Batch contents are sorted by contact id, so the
//! same broadcast always fans out the same way.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use switchyard_core::config::BroadcastConfig;
use switchyard_core::{BroadcastId, ContactId, OrgId, Result, SwitchyardError, Urn};
use switchyard_db::Database;
use switchyard_db::broadcasts::{Broadcast, BroadcastStatus, load_broadcast, set_broadcast_status};
use switchyard_db::contacts::{contact_ids_for_groups, contact_ids_from_urns};
use switchyard_queue::{Broker, Priority, QueueName, Task, TaskHandler, TaskPayload};

/// Contacts per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Broadcasts with at most this many recipients go to the low-latency queue.
pub const LOW_LATENCY_THRESHOLD: usize = 2;

/// Deadline of fan-out and batch tasks.
pub const BROADCAST_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Body of the `send_broadcast` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBroadcastTask {
    pub broadcast_id: BroadcastId,
}

impl TaskPayload for SendBroadcastTask {
    const TASK_TYPE: &'static str = "send_broadcast";
}

/// Send this contact to exactly this URN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrnOverride {
    pub contact_id: ContactId,
    pub urn: Urn,
}

/// Body of the `send_broadcast_batch` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastBatch {
    pub broadcast_id: BroadcastId,
    pub org_id: OrgId,
    pub contact_ids: Vec<ContactId>,
    /// Only set on the terminal batch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urns: Vec<UrnOverride>,
    pub is_last: bool,
    pub text: String,
    pub base_language: String,
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

impl BroadcastBatch {
    pub fn urn_for(&self, contact_id: ContactId) -> Option<&Urn> {
        self.urns.iter().find(|o| o.contact_id == contact_id).map(|o| &o.urn)
    }

    /// Whether `language` has text of its own: the base language or a translation.
    pub fn has_language(&self, language: &str) -> bool {
        language == self.base_language || self.translations.contains_key(language)
    }

    /// Text for `language`, falling back to the base text.
    pub fn text_for(&self, language: Option<&str>) -> &str {
        language
            .and_then(|lang| self.translations.get(lang))
            .map(String::as_str)
            .unwrap_or(&self.text)
    }
}

impl TaskPayload for BroadcastBatch {
    const TASK_TYPE: &'static str = "send_broadcast_batch";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutOptions {
    pub batch_size: usize,
    pub low_latency_threshold: usize,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            low_latency_threshold: LOW_LATENCY_THRESHOLD,
        }
    }
}

impl From<&BroadcastConfig> for FanoutOptions {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            low_latency_threshold: config.low_latency_threshold,
        }
    }
}

/// Batches of one broadcast and where they go.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutPlan {
    pub batches: Vec<BroadcastBatch>,
    pub queue: QueueName,
    pub priority: Priority,
    pub total_recipients: usize,
}

/// Split recipients into batches.
///
/// `contacts` are the explicit and group-expanded contacts, `urns` the
/// contacts resolved from explicit URNs. The terminal batch is always
/// present, even when empty.
pub fn plan_batches(
    broadcast: &Broadcast,
    contacts: &BTreeSet<ContactId>,
    urns: &BTreeMap<ContactId, Urn>,
    options: FanoutOptions,
) -> FanoutPlan {
    let batch_size = options.batch_size.max(1);
    let regular: Vec<ContactId> = contacts
        .iter()
        .copied()
        .filter(|id| !urns.contains_key(id))
        .collect();
    let total_recipients = regular.len() + urns.len();

    let (queue, priority) = if total_recipients <= options.low_latency_threshold {
        (QueueName::Handler, Priority::LowLatency)
    } else {
        (QueueName::Batch, Priority::Default)
    };

    let batch = |contact_ids: Vec<ContactId>, urns: Vec<UrnOverride>, is_last: bool| BroadcastBatch {
        broadcast_id: broadcast.id,
        org_id: broadcast.org_id,
        contact_ids,
        urns,
        is_last,
        text: broadcast.text.clone(),
        base_language: broadcast.base_language.clone(),
        translations: broadcast.translations.clone(),
    };

    let full = regular.len() / batch_size * batch_size;
    let mut batches: Vec<BroadcastBatch> = regular[..full]
        .chunks(batch_size)
        .map(|chunk| batch(chunk.to_vec(), Vec::new(), false))
        .collect();

    let mut last: Vec<ContactId> = regular[full..].to_vec();
    last.extend(urns.keys().copied());
    last.sort_unstable();
    let overrides = urns
        .iter()
        .map(|(contact_id, urn)| UrnOverride {
            contact_id: *contact_id,
            urn: urn.clone(),
        })
        .collect();
    batches.push(batch(last, overrides, true));

    FanoutPlan {
        batches,
        queue,
        priority,
        total_recipients,
    }
}

/// Resolve the broadcast's recipients and plan its batches. URNs nobody
/// owns get a new contact, so this must run in a transaction.
pub fn create_broadcast_batches(
    conn: &Connection,
    broadcast: &Broadcast,
    options: FanoutOptions,
    now: DateTime<Utc>,
) -> Result<FanoutPlan> {
    let mut contacts: BTreeSet<ContactId> = broadcast.contact_ids.iter().copied().collect();
    if !broadcast.group_ids.is_empty() {
        contacts.extend(contact_ids_for_groups(conn, broadcast.org_id, &broadcast.group_ids)?);
    }
    let urns = contact_ids_from_urns(conn, broadcast.org_id, &broadcast.urns, now)?;
    Ok(plan_batches(broadcast, &contacts, &urns, options))
}

/// Handler of `send_broadcast`: fan out and queue every batch.
pub struct SendBroadcastHandler {
    db: Arc<Database>,
    broker: Arc<dyn Broker>,
    options: FanoutOptions,
}

impl SendBroadcastHandler {
    pub fn new(db: Arc<Database>, broker: Arc<dyn Broker>, options: FanoutOptions) -> Self {
        Self { db, broker, options }
    }

    /// Fan out one broadcast. Returns the number of batches queued.
    ///
    /// A batch that cannot be queued does not stop its siblings, but fails
    /// the whole fan-out so the task is redelivered. Batches queued twice
    /// this way send each contact once.
    pub async fn send(&self, broadcast_id: BroadcastId) -> Result<usize> {
        let Some(plan) = self.db.transaction(|tx| {
            let broadcast = load_broadcast(tx, broadcast_id)?;
            if broadcast.status == BroadcastStatus::Sent {
                return Ok(None);
            }
            let plan = create_broadcast_batches(tx, &broadcast, self.options, Utc::now())?;
            // Before any batch exists, so the terminal batch's sent mark always lands last
            set_broadcast_status(tx, broadcast_id, BroadcastStatus::Queued)?;
            Ok(Some(plan))
        })?
        else {
            tracing::info!("📭 Broadcast {} already sent, skipping", broadcast_id);
            return Ok(0);
        };

        let mut queued = 0;
        let mut failed = 0;
        for batch in &plan.batches {
            let org_id = batch.org_id;
            let pushed = match Task::from_payload(org_id, plan.priority, batch) {
                Ok(task) => self.broker.push(plan.queue, task).await,
                Err(e) => Err(e),
            };
            match pushed {
                Ok(()) => queued += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        "❌ Broadcast {} batch of {} contacts not queued (org {}, last: {}): {}",
                        broadcast_id,
                        batch.contact_ids.len(),
                        org_id,
                        batch.is_last,
                        e
                    );
                }
            }
        }

        tracing::info!(
            "📢 Broadcast {} fanned out: {} recipients, {} batches on '{}' ({} failed)",
            broadcast_id,
            plan.total_recipients,
            queued,
            plan.queue,
            failed
        );
        if failed > 0 {
            return Err(SwitchyardError::Queue(format!(
                "{} of {} batches of broadcast {} not queued",
                failed,
                plan.batches.len(),
                broadcast_id
            )));
        }
        Ok(queued)
    }
}

#[async_trait]
impl TaskHandler for SendBroadcastHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        let body: SendBroadcastTask = task.decode()?;
        self.send(body.broadcast_id).await.map(|_| ())
    }

    fn deadline(&self) -> Option<Duration> {
        Some(BROADCAST_DEADLINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_db::broadcasts::{NewBroadcast, create_broadcast};
    use switchyard_db::contacts::{add_to_group, add_urn, create_contact, create_group};
    use switchyard_db::orgs::create_org;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_queue::{MemoryBroker, NackOutcome, QueueStats};

    fn ids(range: std::ops::RangeInclusive<i64>) -> BTreeSet<ContactId> {
        range.map(ContactId).collect()
    }

    fn broadcast() -> Broadcast {
        Broadcast {
            id: BroadcastId(1),
            org_id: OrgId(1),
            text: "Hello".into(),
            base_language: "eng".into(),
            translations: HashMap::from([("fra".to_string(), "Bonjour".to_string())]),
            status: BroadcastStatus::Pending,
            contact_ids: vec![],
            group_ids: vec![],
            urns: vec![],
        }
    }

    fn plan(contacts: &BTreeSet<ContactId>, urns: &BTreeMap<ContactId, Urn>) -> FanoutPlan {
        plan_batches(&broadcast(), contacts, urns, FanoutOptions::default())
    }

    #[test]
    fn test_250_contacts_make_three_batches() {
        let plan = plan(&ids(1..=250), &BTreeMap::new());
        let sizes: Vec<usize> = plan.batches.iter().map(|b| b.contact_ids.len()).collect();
        let last: Vec<bool> = plan.batches.iter().map(|b| b.is_last).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(last, vec![false, false, true]);
        assert_eq!(plan.batches[0].contact_ids[0], ContactId(1));
        assert_eq!(plan.batches[2].contact_ids[49], ContactId(250));
        assert_eq!(plan.queue, QueueName::Batch);
        assert!(plan.batches.iter().all(|b| b.text_for(Some("fra")) == "Bonjour"));
    }

    #[test]
    fn test_exact_multiple_still_has_terminal_batch() {
        let plan = plan(&ids(1..=200), &BTreeMap::new());
        assert_eq!(plan.batches.len(), 3);
        assert!(plan.batches[2].is_last);
        assert!(plan.batches[2].contact_ids.is_empty());
    }

    #[test]
    fn test_overlap_contact_only_in_terminal_batch() {
        let urns = BTreeMap::from([
            (ContactId(5), Urn::new("tel:+250788000005")),
            (ContactId(500), Urn::new("tel:+250788000500")),
        ]);
        let plan = plan(&ids(1..=150), &urns);

        for batch in &plan.batches[..plan.batches.len() - 1] {
            assert!(!batch.contact_ids.contains(&ContactId(5)));
            assert!(batch.urns.is_empty());
        }
        let last = plan.batches.last().unwrap();
        assert_eq!(last.contact_ids.iter().filter(|c| **c == ContactId(5)).count(), 1);
        assert_eq!(last.urn_for(ContactId(5)), Some(&Urn::new("tel:+250788000005")));
        assert!(last.contact_ids.contains(&ContactId(500)));
        assert_eq!(plan.total_recipients, 151);
        let sizes: Vec<usize> = plan.batches.iter().map(|b| b.contact_ids.len()).collect();
        assert_eq!(sizes, vec![100, 51]);
    }

    #[test]
    fn test_small_broadcast_goes_low_latency() {
        let urns = BTreeMap::from([(ContactId(2), Urn::new("tel:+250788000002"))]);
        let plan = plan(&ids(1..=2), &urns);
        assert_eq!(plan.total_recipients, 2);
        assert_eq!(plan.queue, QueueName::Handler);
        assert_eq!(plan.priority, Priority::LowLatency);

        let plan = plan_batches(&broadcast(), &ids(1..=3), &BTreeMap::new(), FanoutOptions::default());
        assert_eq!(plan.queue, QueueName::Batch);
    }

    #[test]
    fn test_empty_broadcast_has_one_empty_terminal_batch() {
        let plan = plan(&BTreeSet::new(), &BTreeMap::new());
        assert_eq!(plan.batches.len(), 1);
        assert!(plan.batches[0].is_last);
        assert_eq!(plan.queue, QueueName::Handler);
    }

    #[tokio::test]
    async fn test_handler_queues_batches_and_marks_queued() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broadcast_id = db
            .transaction(|c| {
                let org = create_org(c, "Nyaruka", "UTC", Some("eng"))?;
                let group = create_group(c, org, "Farmers")?;
                let mut explicit = Vec::new();
                for n in 0..5 {
                    let contact = create_contact(c, org, None, None, Utc::now())?;
                    add_to_group(c, group, contact)?;
                    if n == 0 {
                        explicit.push(contact);
                        add_urn(c, org, contact, &Urn::new("tel:+250788111111"), 1000)?;
                    }
                }
                create_broadcast(
                    c,
                    &NewBroadcast {
                        org_id: org,
                        text: "Rain tomorrow".into(),
                        base_language: "eng".into(),
                        translations: HashMap::new(),
                        contact_ids: explicit,
                        group_ids: vec![group],
                        urns: vec![Urn::new("tel:+250788111111"), Urn::new("tel:+250788999999")],
                    },
                )
            })
            .unwrap();

        let broker = Arc::new(MemoryBroker::default());
        let handler = SendBroadcastHandler::new(
            db.clone(),
            broker.clone(),
            FanoutOptions {
                batch_size: 2,
                low_latency_threshold: 2,
            },
        );
        let task = Task::from_payload(OrgId(1), Priority::Default, &SendBroadcastTask { broadcast_id }).unwrap();
        handler.handle(&task).await.unwrap();

        let mut batches = Vec::new();
        while let Some(task) = broker.pop(QueueName::Batch).await.unwrap() {
            batches.push(task.decode::<BroadcastBatch>().unwrap());
        }
        // the terminal batch holds the overlapping contact and the one created for the new URN
        let sizes: Vec<usize> = batches.iter().map(|b| b.contact_ids.len()).collect();
        assert_eq!(sizes, vec![2, 2, 2]);
        assert_eq!(batches[2].urns.len(), 2);

        let status = db.with_conn(|c| load_broadcast(c, broadcast_id)).unwrap().status;
        assert_eq!(status, BroadcastStatus::Queued);
    }

    #[tokio::test]
    async fn test_sent_broadcast_is_skipped() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broadcast_id = db
            .transaction(|c| {
                let org = create_org(c, "Nyaruka", "UTC", None)?;
                let id = create_broadcast(
                    c,
                    &NewBroadcast {
                        org_id: org,
                        text: "Hi".into(),
                        base_language: "eng".into(),
                        translations: HashMap::new(),
                        contact_ids: vec![],
                        group_ids: vec![],
                        urns: vec![],
                    },
                )?;
                set_broadcast_status(c, id, BroadcastStatus::Sent)?;
                Ok(id)
            })
            .unwrap();

        let broker = Arc::new(MemoryBroker::default());
        let handler = SendBroadcastHandler::new(db, broker.clone(), FanoutOptions::default());
        assert_eq!(handler.send(broadcast_id).await.unwrap(), 0);
        assert!(broker.pop(QueueName::Handler).await.unwrap().is_none());
    }

    /// Memory broker whose pushes fail for the given call numbers.
    struct FailingBroker {
        inner: MemoryBroker,
        pushes: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl Broker for FailingBroker {
        fn name(&self) -> &str {
            "failing"
        }

        async fn push(&self, queue: QueueName, task: Task) -> Result<()> {
            let n = self.pushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&n) {
                return Err(SwitchyardError::Queue("broker unavailable".into()));
            }
            self.inner.push(queue, task).await
        }

        async fn pop(&self, queue: QueueName) -> Result<Option<Task>> {
            self.inner.pop(queue).await
        }

        async fn ack(&self, queue: QueueName, task: &Task) -> Result<()> {
            self.inner.ack(queue, task).await
        }

        async fn nack(&self, queue: QueueName, task: &Task) -> Result<NackOutcome> {
            self.inner.nack(queue, task).await
        }

        async fn dead_letter(&self, queue: QueueName, task: &Task) -> Result<()> {
            self.inner.dead_letter(queue, task).await
        }

        async fn stats(&self, queue: QueueName) -> Result<QueueStats> {
            self.inner.stats(queue).await
        }
    }

    #[tokio::test]
    async fn test_failed_terminal_push_fails_task_and_retries() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let broadcast_id = db
            .transaction(|c| {
                let org = create_org(c, "Nyaruka", "UTC", None)?;
                let mut contacts = Vec::new();
                for _ in 0..3 {
                    contacts.push(create_contact(c, org, None, None, Utc::now())?);
                }
                create_broadcast(
                    c,
                    &NewBroadcast {
                        org_id: org,
                        text: "Hi".into(),
                        base_language: "eng".into(),
                        translations: HashMap::new(),
                        contact_ids: contacts,
                        group_ids: vec![],
                        urns: vec![],
                    },
                )
            })
            .unwrap();

        // batches: [2 contacts], terminal [1 contact]; the first terminal push fails
        let broker = Arc::new(FailingBroker {
            inner: MemoryBroker::default(),
            pushes: AtomicUsize::new(0),
            fail_on: vec![1],
        });
        let handler = SendBroadcastHandler::new(
            db.clone(),
            broker.clone(),
            FanoutOptions {
                batch_size: 2,
                low_latency_threshold: 2,
            },
        );

        let err = handler.send(broadcast_id).await.unwrap_err();
        assert!(matches!(err, SwitchyardError::Queue(_)));
        let status = db.with_conn(|c| load_broadcast(c, broadcast_id)).unwrap().status;
        assert_eq!(status, BroadcastStatus::Queued);

        assert_eq!(handler.send(broadcast_id).await.unwrap(), 2);
        let mut last = 0;
        while let Some(task) = broker.pop(QueueName::Batch).await.unwrap() {
            if task.decode::<BroadcastBatch>().unwrap().is_last {
                last += 1;
            }
        }
        assert_eq!(last, 1);
    }
}
