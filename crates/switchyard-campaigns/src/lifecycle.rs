//! Fire lifecycle: recompute, create and cancel pending fires.
//!
//! Every function runs on the caller's connection or transaction so fire
//! changes commit together with whatever caused them. Recomputation always
//! deletes a pair's unfired fire before inserting the new one.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use switchyard_core::{CampaignEventId, ContactId, Result, SwitchyardError};
use switchyard_db::OrgAssets;
use switchyard_db::campaigns::deactivate_campaign_event;
use switchyard_db::contacts::{Contact, contact_ids_for_groups, load_contacts};
use switchyard_db::fires::{
    FireAdd, FireDelete, add_event_fires, delete_unfired_contact_fires, delete_unfired_event_fires,
    delete_unfired_fires,
};

use crate::schedule::schedule_for_contact;

/// Recompute the unfired fires of `contacts`.
///
/// With `keys`, only events relative to one of those keys are touched;
/// without, every active event of the org is. Returns the number of fires
/// inserted. A computation error skips that pair and is logged.
pub fn reschedule_contact_fires(
    conn: &Connection,
    assets: &OrgAssets,
    now: DateTime<Utc>,
    contacts: &[Contact],
    keys: Option<&HashSet<String>>,
) -> Result<usize> {
    let tz = assets.timezone();
    let events: Vec<_> = assets
        .campaigns
        .events()
        .into_iter()
        .filter(|(_, e)| keys.is_none_or(|k| k.contains(&e.relative_to_key)))
        .collect();
    if events.is_empty() || contacts.is_empty() {
        return Ok(0);
    }

    let mut deletes = Vec::new();
    let mut adds = Vec::new();
    for contact in contacts {
        for (campaign, event) in &events {
            deletes.push(FireDelete {
                contact_id: contact.id,
                event_id: event.id,
            });
            match schedule_for_contact(&tz, now, contact, campaign, event) {
                Ok(Some(scheduled)) => adds.push(FireAdd {
                    contact_id: contact.id,
                    event_id: event.id,
                    scheduled,
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    "⚠️ Cannot schedule event {} for contact {} (org {}): {}",
                    event.id,
                    contact.id,
                    assets.org_id(),
                    e
                ),
            }
        }
    }

    for chunk in deletes.chunks(FIRE_BULK_CHUNK) {
        delete_unfired_fires(conn, chunk)?;
    }
    for chunk in adds.chunks(FIRE_BULK_CHUNK) {
        add_event_fires(conn, chunk)?;
    }
    tracing::debug!(
        "📅 Rescheduled {} contacts over {} events (org {}): {} fires",
        contacts.len(),
        events.len(),
        assets.org_id(),
        adds.len()
    );
    Ok(adds.len())
}

/// (Re)create the fires of one event for every member of its campaign group.
pub fn schedule_event(
    conn: &Connection,
    assets: &OrgAssets,
    now: DateTime<Utc>,
    event_id: CampaignEventId,
) -> Result<usize> {
    let (campaign, event) = assets.campaigns.event(event_id).ok_or(SwitchyardError::NotFound {
        entity: "campaign event",
        id: event_id.as_i64(),
    })?;

    delete_unfired_event_fires(conn, event_id)?;

    let members: Vec<ContactId> = contact_ids_for_groups(conn, assets.org_id(), &[campaign.group_id])?
        .into_iter()
        .collect();
    let contacts = load_contacts(conn, assets.org_id(), &members)?;

    let tz = assets.timezone();
    let mut adds = Vec::with_capacity(contacts.len());
    for contact in &contacts {
        // A bad unit fails the same way for every contact: stop at the first
        if let Some(scheduled) = schedule_for_contact(&tz, now, contact, campaign, event)? {
            adds.push(FireAdd {
                contact_id: contact.id,
                event_id,
                scheduled,
            });
        }
    }

    for chunk in adds.chunks(FIRE_BULK_CHUNK) {
        add_event_fires(conn, chunk)?;
    }
    tracing::info!(
        "📅 Scheduled event {} of campaign '{}': {} fires for {} members",
        event_id,
        campaign.name,
        adds.len(),
        contacts.len()
    );
    Ok(adds.len())
}

/// Rows per bulk fire statement, within SQLite's parameter limit.
const FIRE_BULK_CHUNK: usize = 5_000;

/// Deactivate an event and drop its pending fires. Fired rows stay as history.
pub fn deactivate_event(conn: &Connection, event_id: CampaignEventId) -> Result<usize> {
    deactivate_campaign_event(conn, event_id)?;
    let removed = delete_unfired_event_fires(conn, event_id)?;
    tracing::info!("🗑️ Event {} deactivated, {} pending fires removed", event_id, removed);
    Ok(removed)
}

/// Drop every pending fire of a contact that left all campaigns (blocked, stopped, deleted).
pub fn remove_contact(conn: &Connection, contact_id: ContactId) -> Result<usize> {
    delete_unfired_contact_fires(conn, contact_id)
}
