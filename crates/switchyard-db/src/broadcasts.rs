//! Broadcast definitions and their status.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::types::FromSql;
use rusqlite::{Connection, OptionalExtension, params};

use switchyard_core::{BroadcastId, ContactId, GroupId, OrgId, Result, SwitchyardError, Urn};

use crate::timestamps::format_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    Pending,
    /// Batches have been queued.
    Queued,
    /// The terminal batch finished.
    Sent,
}

impl BroadcastStatus {
    pub fn code(&self) -> &'static str {
        match self {
            BroadcastStatus::Pending => "P",
            BroadcastStatus::Queued => "Q",
            BroadcastStatus::Sent => "S",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "P" => Ok(BroadcastStatus::Pending),
            "Q" => Ok(BroadcastStatus::Queued),
            "S" => Ok(BroadcastStatus::Sent),
            other => Err(SwitchyardError::Data(format!("unknown broadcast status '{other}'"))),
        }
    }
}

/// A mass-send request.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub org_id: OrgId,
    pub text: String,
    pub base_language: String,
    /// Language code → text.
    pub translations: HashMap<String, String>,
    pub status: BroadcastStatus,
    pub contact_ids: Vec<ContactId>,
    pub group_ids: Vec<GroupId>,
    pub urns: Vec<Urn>,
}

/// Fields of a new broadcast.
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub org_id: OrgId,
    pub text: String,
    pub base_language: String,
    pub translations: HashMap<String, String>,
    pub contact_ids: Vec<ContactId>,
    pub group_ids: Vec<GroupId>,
    pub urns: Vec<Urn>,
}

pub fn create_broadcast(conn: &Connection, new: &NewBroadcast) -> Result<BroadcastId> {
    let now = format_ts(Utc::now());
    conn.execute(
        "INSERT INTO broadcasts (org_id, text, base_language, translations, status, created_on, modified_on)
         VALUES (?1, ?2, ?3, ?4, 'P', ?5, ?5)",
        params![
            new.org_id,
            new.text,
            new.base_language,
            serde_json::to_string(&new.translations)?,
            now
        ],
    )?;
    let id = BroadcastId(conn.last_insert_rowid());

    for contact in &new.contact_ids {
        conn.execute(
            "INSERT OR IGNORE INTO broadcast_contacts (broadcast_id, contact_id) VALUES (?1, ?2)",
            params![id, contact],
        )?;
    }
    for group in &new.group_ids {
        conn.execute(
            "INSERT OR IGNORE INTO broadcast_groups (broadcast_id, group_id) VALUES (?1, ?2)",
            params![id, group],
        )?;
    }
    for urn in &new.urns {
        conn.execute(
            "INSERT OR IGNORE INTO broadcast_urns (broadcast_id, urn) VALUES (?1, ?2)",
            params![id, urn],
        )?;
    }
    Ok(id)
}

pub fn load_broadcast(conn: &Connection, id: BroadcastId) -> Result<Broadcast> {
    let row: Option<(OrgId, String, String, String, String)> = conn
        .query_row(
            "SELECT org_id, text, base_language, translations, status FROM broadcasts WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let (org_id, text, base_language, translations, status) = row.ok_or(SwitchyardError::NotFound {
        entity: "broadcast",
        id: id.as_i64(),
    })?;

    let contact_ids: Vec<ContactId> = column_list(
        conn,
        "SELECT contact_id FROM broadcast_contacts WHERE broadcast_id = ?1 ORDER BY contact_id",
        id,
    )?;
    let group_ids: Vec<GroupId> = column_list(
        conn,
        "SELECT group_id FROM broadcast_groups WHERE broadcast_id = ?1 ORDER BY group_id",
        id,
    )?;
    let urns: Vec<Urn> = column_list(
        conn,
        "SELECT urn FROM broadcast_urns WHERE broadcast_id = ?1 ORDER BY urn",
        id,
    )?;

    Ok(Broadcast {
        id,
        org_id,
        text,
        base_language,
        translations: serde_json::from_str(&translations)?,
        status: BroadcastStatus::from_code(&status)?,
        contact_ids,
        group_ids,
        urns,
    })
}

fn column_list<T: FromSql>(conn: &Connection, sql: &str, id: BroadcastId) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<T>>>()?;
    Ok(values)
}

pub fn set_broadcast_status(conn: &Connection, id: BroadcastId, status: BroadcastStatus) -> Result<()> {
    let changed = conn.execute(
        "UPDATE broadcasts SET status = ?1, modified_on = ?2 WHERE id = ?3",
        params![status.code(), format_ts(Utc::now()), id],
    )?;
    if changed == 0 {
        return Err(SwitchyardError::NotFound {
            entity: "broadcast",
            id: id.as_i64(),
        });
    }
    Ok(())
}

/// Mark a broadcast sent once its terminal batch is done.
pub fn mark_broadcast_sent(conn: &Connection, id: BroadcastId) -> Result<()> {
    set_broadcast_status(conn, id, BroadcastStatus::Sent)
}
