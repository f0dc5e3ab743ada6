//! Event fire store.
//!
//! A fire is one pending (or resolved) trigger of a campaign event for one
//! contact. At most one unfired row exists per (event, contact): writers
//! delete the pair's unfired rows before inserting, in the same transaction,
//! and a partial unique index rejects anything that slips through.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use switchyard_core::{CampaignEventId, ContactId, FireId, OrgId, Result, SwitchyardError};

use crate::bulk::{BulkRow, bulk_sql, id_chunks, placeholders};
use crate::timestamps::{format_ts, opt_ts_column, ts_column};

/// How a fire was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiredResult {
    /// The flow was started.
    Fired,
    /// The contact was skipped (already in a flow, or the event is gone).
    Skipped,
}

impl FiredResult {
    pub fn code(&self) -> &'static str {
        match self {
            FiredResult::Fired => "F",
            FiredResult::Skipped => "S",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "F" => Ok(FiredResult::Fired),
            "S" => Ok(FiredResult::Skipped),
            other => Err(SwitchyardError::Data(format!("unknown fired result '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventFire {
    pub id: FireId,
    pub event_id: CampaignEventId,
    pub contact_id: ContactId,
    pub scheduled: DateTime<Utc>,
    pub fired: Option<DateTime<Utc>>,
    pub fired_result: Option<FiredResult>,
}

/// An unfired fire that is due, with the org it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DueFire {
    pub org_id: OrgId,
    pub fire: EventFire,
}

/// A fire to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct FireAdd {
    pub contact_id: ContactId,
    pub event_id: CampaignEventId,
    pub scheduled: DateTime<Utc>,
}

impl BulkRow for FireAdd {
    const COLUMNS: usize = 3;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.contact_id.as_i64()),
            Value::Integer(self.event_id.as_i64()),
            Value::Text(format_ts(self.scheduled)),
        ]
    }
}

/// A (contact, event) pair whose unfired fire should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FireDelete {
    pub contact_id: ContactId,
    pub event_id: CampaignEventId,
}

impl BulkRow for FireDelete {
    const COLUMNS: usize = 2;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.contact_id.as_i64()),
            Value::Integer(self.event_id.as_i64()),
        ]
    }
}

struct FireMark {
    id: FireId,
    fired: String,
    result: FiredResult,
}

impl BulkRow for FireMark {
    const COLUMNS: usize = 3;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id.as_i64()),
            Value::Text(self.fired.clone()),
            Value::Text(self.result.code().to_string()),
        ]
    }
}

const INSERT_FIRES_SQL: &str =
    "INSERT INTO event_fires (contact_id, event_id, scheduled) VALUES {values}";

const MARK_FIRED_SQL: &str = "WITH r(id, fired, fired_result) AS (VALUES {values})
    UPDATE event_fires SET fired = r.fired, fired_result = r.fired_result
    FROM r WHERE event_fires.id = r.id AND event_fires.fired IS NULL";

const DELETE_UNFIRED_SQL: &str = "WITH r(contact_id, event_id) AS (VALUES {values})
    DELETE FROM event_fires WHERE fired IS NULL AND EXISTS (
        SELECT 1 FROM r WHERE r.contact_id = event_fires.contact_id AND r.event_id = event_fires.event_id
    )";

/// Bulk insert fires.
pub fn add_event_fires(conn: &Connection, fires: &[FireAdd]) -> Result<usize> {
    bulk_sql(conn, "adding campaign event fires", INSERT_FIRES_SQL, fires)
}

/// Mark fires resolved with `result` at `fired`. Already resolved fires are left alone.
pub fn mark_events_fired(
    conn: &Connection,
    ids: &[FireId],
    fired: DateTime<Utc>,
    result: FiredResult,
) -> Result<usize> {
    let fired = format_ts(fired);
    let marks: Vec<FireMark> = ids
        .iter()
        .map(|id| FireMark {
            id: *id,
            fired: fired.clone(),
            result,
        })
        .collect();
    bulk_sql(conn, "marking event fires", MARK_FIRED_SQL, &marks)
}

/// Delete the unfired fires of the given (contact, event) pairs.
pub fn delete_unfired_fires(conn: &Connection, pairs: &[FireDelete]) -> Result<usize> {
    bulk_sql(conn, "deleting unfired event fires", DELETE_UNFIRED_SQL, pairs)
}

/// Delete every unfired fire of a contact.
pub fn delete_unfired_contact_fires(conn: &Connection, contact_id: ContactId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM event_fires WHERE contact_id = ?1 AND fired IS NULL",
        params![contact_id],
    )?)
}

/// Delete every unfired fire of an event.
pub fn delete_unfired_event_fires(conn: &Connection, event_id: CampaignEventId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM event_fires WHERE event_id = ?1 AND fired IS NULL",
        params![event_id],
    )?)
}

const FIRE_COLUMNS: &str = "f.id, f.event_id, f.contact_id, f.scheduled, f.fired, f.fired_result";

fn fire_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(EventFire, Option<String>)> {
    Ok((
        EventFire {
            id: row.get(0)?,
            event_id: row.get(1)?,
            contact_id: row.get(2)?,
            scheduled: ts_column(row, 3)?,
            fired: opt_ts_column(row, 4)?,
            fired_result: None,
        },
        row.get(5)?,
    ))
}

fn finish(pair: (EventFire, Option<String>)) -> Result<EventFire> {
    let (mut fire, code) = pair;
    fire.fired_result = code.as_deref().map(FiredResult::from_code).transpose()?;
    Ok(fire)
}

/// Load the still unfired fires among `ids`, ordered by id.
pub fn load_event_fires(conn: &Connection, ids: &[FireId]) -> Result<Vec<EventFire>> {
    let mut fires = Vec::new();
    for chunk in id_chunks(ids) {
        let mut stmt = conn.prepare(&format!(
            "SELECT {FIRE_COLUMNS} FROM event_fires f WHERE f.fired IS NULL AND f.id IN ({}) ORDER BY f.id",
            placeholders(chunk.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), fire_from_row)?;
        for row in rows {
            fires.push(finish(row?)?);
        }
    }
    fires.sort_by_key(|f| f.id);
    Ok(fires)
}

/// All fires of a contact, resolved or not, ordered by id.
pub fn load_contact_fires(conn: &Connection, contact_id: ContactId) -> Result<Vec<EventFire>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FIRE_COLUMNS} FROM event_fires f WHERE f.contact_id = ?1 ORDER BY f.id"
    ))?;
    let rows = stmt.query_map(params![contact_id], fire_from_row)?;
    let mut fires = Vec::new();
    for row in rows {
        fires.push(finish(row?)?);
    }
    Ok(fires)
}

/// Unfired fires scheduled at or before `now`, oldest first. `after` is the
/// (scheduled, id) of the last fire of the previous page.
pub fn load_due_fires(
    conn: &Connection,
    now: DateTime<Utc>,
    after: Option<(DateTime<Utc>, FireId)>,
    limit: usize,
) -> Result<Vec<DueFire>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {FIRE_COLUMNS}, c.org_id
         FROM event_fires f
         JOIN campaign_events e ON e.id = f.event_id
         JOIN campaigns c ON c.id = e.campaign_id
         WHERE f.fired IS NULL AND f.scheduled <= ?1
           AND (?2 IS NULL OR f.scheduled > ?2 OR (f.scheduled = ?2 AND f.id > ?3))
         ORDER BY f.scheduled, f.id
         LIMIT ?4"
    ))?;
    let (after_scheduled, after_id) = match after {
        Some((scheduled, id)) => (Some(format_ts(scheduled)), Some(id)),
        None => (None, None),
    };
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![format_ts(now), after_scheduled, after_id, limit], |row| {
        Ok((fire_from_row(row)?, row.get::<_, OrgId>(6)?))
    })?;

    let mut due = Vec::new();
    for row in rows {
        let (pair, org_id) = row?;
        due.push(DueFire {
            org_id,
            fire: finish(pair)?,
        });
    }
    Ok(due)
}
