//! Outbound messages materialized for the courier.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use switchyard_core::{BroadcastId, ContactId, MsgId, OrgId, Result, Urn};

use crate::timestamps::{format_ts, ts_column};

/// A queued outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub id: MsgId,
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub broadcast_id: Option<BroadcastId>,
    pub urn: Urn,
    pub text: String,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMsg {
    pub org_id: OrgId,
    pub contact_id: ContactId,
    pub broadcast_id: Option<BroadcastId>,
    pub urn: Urn,
    pub text: String,
}

/// Insert messages with status queued and return the ones actually created.
/// A broadcast has at most one message per contact, so rows already present
/// for the same broadcast and contact are skipped.
pub fn insert_msgs(conn: &Connection, new: &[NewMsg], now: DateTime<Utc>) -> Result<Vec<Msg>> {
    let created = format_ts(now);
    let mut stmt = conn.prepare_cached(
        "INSERT INTO msgs (org_id, contact_id, broadcast_id, urn, text, status, created_on)
         VALUES (?1, ?2, ?3, ?4, ?5, 'Q', ?6)
         ON CONFLICT DO NOTHING",
    )?;

    let mut msgs = Vec::with_capacity(new.len());
    for m in new {
        let inserted = stmt.execute(params![m.org_id, m.contact_id, m.broadcast_id, m.urn, m.text, created])?;
        if inserted == 0 {
            tracing::debug!(
                "Contact {} already has a message for broadcast {:?}",
                m.contact_id,
                m.broadcast_id
            );
            continue;
        }
        msgs.push(Msg {
            id: MsgId(conn.last_insert_rowid()),
            org_id: m.org_id,
            contact_id: m.contact_id,
            broadcast_id: m.broadcast_id,
            urn: m.urn.clone(),
            text: m.text.clone(),
            created_on: now,
        });
    }
    Ok(msgs)
}

/// Delete messages by id. Used to undo messages the courier never accepted.
pub fn delete_msgs(conn: &Connection, ids: &[MsgId]) -> Result<usize> {
    let mut stmt = conn.prepare_cached("DELETE FROM msgs WHERE id = ?1")?;
    let mut deleted = 0;
    for id in ids {
        deleted += stmt.execute(params![id])?;
    }
    Ok(deleted)
}

/// Messages created for a broadcast, ordered by id.
pub fn load_broadcast_msgs(conn: &Connection, broadcast_id: BroadcastId) -> Result<Vec<Msg>> {
    let mut stmt = conn.prepare(
        "SELECT id, org_id, contact_id, broadcast_id, urn, text, created_on
         FROM msgs WHERE broadcast_id = ?1 ORDER BY id",
    )?;
    let msgs = stmt
        .query_map(params![broadcast_id], |row| {
            Ok(Msg {
                id: row.get(0)?,
                org_id: row.get(1)?,
                contact_id: row.get(2)?,
                broadcast_id: row.get(3)?,
                urn: row.get(4)?,
                text: row.get(5)?,
                created_on: ts_column(row, 6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(msgs)
}
