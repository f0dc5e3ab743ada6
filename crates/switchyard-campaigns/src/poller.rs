//! Campaign fire poller: the loop that turns due fires into tasks.
//! Uses tokio::interval so it sleeps between checks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use switchyard_core::{CampaignEventId, FireId, OrgId, Result};
use switchyard_db::Database;
use switchyard_db::fires::load_due_fires;
use switchyard_queue::{Broker, Priority, QueueName, Task};

use crate::worker::FireCampaignEventTask;

/// Remembers which fires are already queued so consecutive polls do not
/// queue them twice. Entries expire after `ttl` in case a worker never
/// reports back.
pub struct FireMarker {
    queued: Mutex<HashMap<FireId, Instant>>,
    ttl: Duration,
}

impl FireMarker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mark `ids` as queued. Returns only the ids that were not already marked.
    pub fn claim(&self, ids: &[FireId]) -> Vec<FireId> {
        let now = Instant::now();
        let Ok(mut queued) = self.queued.lock() else {
            tracing::error!("⚠️ Fire marker lock poisoned, claiming everything");
            return ids.to_vec();
        };
        queued.retain(|_, at| now.duration_since(*at) < self.ttl);
        ids.iter()
            .copied()
            .filter(|id| {
                if queued.contains_key(id) {
                    false
                } else {
                    queued.insert(*id, now);
                    true
                }
            })
            .collect()
    }

    /// Forget `ids` once they are handled (or failed to queue).
    pub fn release(&self, ids: &[FireId]) {
        if let Ok(mut queued) = self.queued.lock() {
            for id in ids {
                queued.remove(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queued.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Finds due fires and queues one `fire_campaign_event` task per (org, event).
pub struct FirePoller {
    db: Arc<Database>,
    broker: Arc<dyn Broker>,
    marker: Arc<FireMarker>,
    batch_limit: usize,
}

impl FirePoller {
    pub fn new(db: Arc<Database>, broker: Arc<dyn Broker>, marker: Arc<FireMarker>, batch_limit: usize) -> Self {
        Self {
            db,
            broker,
            marker,
            batch_limit,
        }
    }

    /// One poll. Returns the number of tasks queued.
    ///
    /// Fires still marked from an earlier poll are paged past, so a backlog
    /// of in-flight fires never hides newer due ones.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let limit = self.batch_limit.max(1);
        let mut groups: BTreeMap<(OrgId, CampaignEventId), Vec<FireId>> = BTreeMap::new();
        let mut claimed_total = 0;
        let mut after = None;

        while claimed_total < limit {
            let page = self
                .db
                .with_conn(|conn| load_due_fires(conn, now, after, limit))?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some((last.fire.scheduled, last.fire.id));
            let exhausted = page.len() < limit;

            let ids: Vec<FireId> = page.iter().map(|d| d.fire.id).collect();
            let claimed: HashSet<FireId> = self.marker.claim(&ids).into_iter().collect();
            for d in page.iter().filter(|d| claimed.contains(&d.fire.id)) {
                groups
                    .entry((d.org_id, d.fire.event_id))
                    .or_default()
                    .push(d.fire.id);
            }
            claimed_total += claimed.len();
            if exhausted {
                break;
            }
        }

        let mut queued = 0;
        for ((org_id, event_id), claimed) in groups {
            let payload = FireCampaignEventTask {
                org_id,
                event_id,
                fire_ids: claimed.clone(),
            };
            let pushed = match Task::from_payload(org_id, Priority::Default, &payload) {
                Ok(task) => self.broker.push(QueueName::Batch, task).await,
                Err(e) => Err(e),
            };
            match pushed {
                Ok(()) => {
                    tracing::info!(
                        "🔔 Queued {} fires of event {} (org {})",
                        claimed.len(),
                        event_id,
                        org_id
                    );
                    queued += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Failed to queue fires of event {} (org {}): {}",
                        event_id,
                        org_id,
                        e
                    );
                    self.marker.release(&claimed);
                }
            }
        }
        Ok(queued)
    }
}

/// Spawn the poll loop as a background tokio task.
pub async fn spawn_fire_poller(poller: Arc<FirePoller>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("⏰ Campaign fire poller started (check every {}s)", every.as_secs());
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = poller.poll_once(Utc::now()).await {
            tracing::error!("⚠️ Campaign fire poll failed: {e}");
        }
    }
    tracing::info!("👋 Campaign fire poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_claims_once() {
        let marker = FireMarker::new(Duration::from_secs(60));
        assert_eq!(marker.claim(&[FireId(1), FireId(2)]), vec![FireId(1), FireId(2)]);
        assert_eq!(marker.claim(&[FireId(2), FireId(3)]), vec![FireId(3)]);
        marker.release(&[FireId(2)]);
        assert_eq!(marker.claim(&[FireId(2)]), vec![FireId(2)]);
        assert_eq!(marker.len(), 3);
    }

    #[test]
    fn test_marker_entries_expire() {
        let marker = FireMarker::new(Duration::ZERO);
        assert_eq!(marker.claim(&[FireId(1)]), vec![FireId(1)]);
        assert_eq!(marker.claim(&[FireId(1)]), vec![FireId(1)]);
    }
}
