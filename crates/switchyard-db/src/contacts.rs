//! Contacts, their URNs, groups and field values.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use switchyard_core::{ContactId, FieldId, GroupId, OrgId, Result, SwitchyardError, Urn};

use crate::bulk::{id_chunks, placeholders};
use crate::timestamps::{format_ts, parse_ts, ts_column};

/// Contact status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    Active,
    Blocked,
    Stopped,
}

impl ContactStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ContactStatus::Active => "A",
            ContactStatus::Blocked => "B",
            ContactStatus::Stopped => "S",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "A" => Ok(ContactStatus::Active),
            "B" => Ok(ContactStatus::Blocked),
            "S" => Ok(ContactStatus::Stopped),
            other => Err(SwitchyardError::Data(format!("unknown contact status '{other}'"))),
        }
    }
}

/// Declared type of a contact field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Datetime,
}

impl FieldType {
    pub fn code(&self) -> &'static str {
        match self {
            FieldType::Text => "T",
            FieldType::Number => "N",
            FieldType::Datetime => "D",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "T" => Ok(FieldType::Text),
            "N" => Ok(FieldType::Number),
            "D" => Ok(FieldType::Datetime),
            other => Err(SwitchyardError::Data(format!("unknown field type '{other}'"))),
        }
    }
}

/// A contact field definition.
#[derive(Debug, Clone)]
pub struct ContactField {
    pub id: FieldId,
    pub key: String,
    pub name: String,
    pub value_type: FieldType,
}

/// A typed field value. Values that do not parse as their declared type
/// stay as text.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Datetime(DateTime<Utc>),
}

impl FieldValue {
    /// Interpret a stored raw value according to the field type.
    pub fn parse(value_type: FieldType, raw: &str) -> Self {
        match value_type {
            FieldType::Text => FieldValue::Text(raw.to_string()),
            FieldType::Number => raw
                .trim()
                .parse::<f64>()
                .map(FieldValue::Number)
                .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
            FieldType::Datetime => parse_ts(raw.trim())
                .map(FieldValue::Datetime)
                .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
        }
    }
}

/// Everything the schedulers and hooks need to know about one contact.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: ContactId,
    pub org_id: OrgId,
    pub uuid: String,
    pub name: Option<String>,
    pub language: Option<String>,
    pub status: ContactStatus,
    pub created_on: DateTime<Utc>,
    pub groups: BTreeSet<GroupId>,
    pub fields: HashMap<String, FieldValue>,
    /// Highest priority first.
    pub urns: Vec<Urn>,
}

impl Contact {
    pub fn in_group(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    /// The URN messages go to when nothing overrides it.
    pub fn preferred_urn(&self) -> Option<&Urn> {
        self.urns.first()
    }
}

/// Create a contact with a fresh UUID.
pub fn create_contact(
    conn: &Connection,
    org_id: OrgId,
    name: Option<&str>,
    language: Option<&str>,
    created_on: DateTime<Utc>,
) -> Result<ContactId> {
    let created = format_ts(created_on);
    conn.execute(
        "INSERT INTO contacts (org_id, uuid, name, language, status, created_on, modified_on)
         VALUES (?1, ?2, ?3, ?4, 'A', ?5, ?5)",
        params![org_id, uuid::Uuid::new_v4().to_string(), name, language, created],
    )?;
    Ok(ContactId(conn.last_insert_rowid()))
}

/// Change a contact's status.
pub fn set_contact_status(conn: &Connection, id: ContactId, status: ContactStatus) -> Result<()> {
    conn.execute(
        "UPDATE contacts SET status = ?1 WHERE id = ?2",
        params![status.code(), id],
    )?;
    Ok(())
}

/// Attach a URN to a contact. Higher priority wins when choosing a send address.
pub fn add_urn(
    conn: &Connection,
    org_id: OrgId,
    contact_id: ContactId,
    urn: &Urn,
    priority: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO contact_urns (org_id, contact_id, identity, priority) VALUES (?1, ?2, ?3, ?4)",
        params![org_id, contact_id, urn, priority],
    )?;
    Ok(())
}

pub fn create_group(conn: &Connection, org_id: OrgId, name: &str) -> Result<GroupId> {
    conn.execute(
        "INSERT INTO contact_groups (org_id, name) VALUES (?1, ?2)",
        params![org_id, name],
    )?;
    Ok(GroupId(conn.last_insert_rowid()))
}

pub fn add_to_group(conn: &Connection, group_id: GroupId, contact_id: ContactId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO contact_group_members (group_id, contact_id) VALUES (?1, ?2)",
        params![group_id, contact_id],
    )?;
    Ok(())
}

pub fn create_field(
    conn: &Connection,
    org_id: OrgId,
    key: &str,
    name: &str,
    value_type: FieldType,
) -> Result<FieldId> {
    conn.execute(
        "INSERT INTO contact_fields (org_id, field_key, name, value_type) VALUES (?1, ?2, ?3, ?4)",
        params![org_id, key, name, value_type.code()],
    )?;
    Ok(FieldId(conn.last_insert_rowid()))
}

/// Set a single field value. Session commits use the bulk path in the hooks crate.
pub fn set_field_value(conn: &Connection, contact_id: ContactId, field_id: FieldId, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO contact_field_values (contact_id, field_id, value) VALUES (?1, ?2, ?3)
         ON CONFLICT (contact_id, field_id) DO UPDATE SET value = excluded.value",
        params![contact_id, field_id, value],
    )?;
    Ok(())
}

/// All field definitions of an org, keyed by field key.
pub fn load_fields(conn: &Connection, org_id: OrgId) -> Result<HashMap<String, ContactField>> {
    let mut stmt = conn.prepare(
        "SELECT id, field_key, name, value_type FROM contact_fields WHERE org_id = ?1",
    )?;
    let rows = stmt.query_map(params![org_id], |row| {
        Ok((
            row.get::<_, FieldId>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut fields = HashMap::new();
    for row in rows {
        let (id, key, name, code) = row?;
        let value_type = FieldType::from_code(&code)?;
        fields.insert(key.clone(), ContactField { id, key, name, value_type });
    }
    Ok(fields)
}

/// Load contacts by id, ordered by id. Ids from other orgs or unknown ids are skipped.
pub fn load_contacts(conn: &Connection, org_id: OrgId, ids: &[ContactId]) -> Result<Vec<Contact>> {
    let mut contacts: BTreeMap<ContactId, Contact> = BTreeMap::new();

    for chunk in id_chunks(ids) {
        let list = placeholders(chunk.len());
        let mut args: Vec<i64> = vec![org_id.as_i64()];
        args.extend(chunk.iter().map(|id| id.as_i64()));

        let mut stmt = conn.prepare(&format!(
            "SELECT id, uuid, name, language, status, created_on
             FROM contacts WHERE org_id = ? AND id IN ({list})"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, ContactId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                ts_column(row, 5)?,
            ))
        })?;
        for row in rows {
            let (id, uuid, name, language, status, created_on) = row?;
            contacts.insert(
                id,
                Contact {
                    id,
                    org_id,
                    uuid,
                    name,
                    language,
                    status: ContactStatus::from_code(&status)?,
                    created_on,
                    groups: BTreeSet::new(),
                    fields: HashMap::new(),
                    urns: Vec::new(),
                },
            );
        }

        let ids_only: Vec<i64> = chunk.iter().map(|id| id.as_i64()).collect();

        let mut stmt = conn.prepare(&format!(
            "SELECT contact_id, identity FROM contact_urns
             WHERE contact_id IN ({list}) ORDER BY priority DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids_only.iter()), |row| {
            Ok((row.get::<_, ContactId>(0)?, row.get::<_, Urn>(1)?))
        })?;
        for row in rows {
            let (id, urn) = row?;
            if let Some(contact) = contacts.get_mut(&id) {
                contact.urns.push(urn);
            }
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT contact_id, group_id FROM contact_group_members WHERE contact_id IN ({list})"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids_only.iter()), |row| {
            Ok((row.get::<_, ContactId>(0)?, row.get::<_, GroupId>(1)?))
        })?;
        for row in rows {
            let (id, group) = row?;
            if let Some(contact) = contacts.get_mut(&id) {
                contact.groups.insert(group);
            }
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT v.contact_id, f.field_key, f.value_type, v.value
             FROM contact_field_values v JOIN contact_fields f ON f.id = v.field_id
             WHERE v.contact_id IN ({list})"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids_only.iter()), |row| {
            Ok((
                row.get::<_, ContactId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (id, key, code, raw) = row?;
            if let Some(contact) = contacts.get_mut(&id) {
                let value = FieldValue::parse(FieldType::from_code(&code)?, &raw);
                contact.fields.insert(key, value);
            }
        }
    }

    Ok(contacts.into_values().collect())
}

/// Members of any of `groups`, deduplicated.
pub fn contact_ids_for_groups(
    conn: &Connection,
    org_id: OrgId,
    groups: &[GroupId],
) -> Result<BTreeSet<ContactId>> {
    let mut ids = BTreeSet::new();
    for chunk in id_chunks(groups) {
        let mut args: Vec<i64> = vec![org_id.as_i64()];
        args.extend(chunk.iter().map(|g| g.as_i64()));
        let mut stmt = conn.prepare(&format!(
            "SELECT m.contact_id FROM contact_group_members m
             JOIN contact_groups g ON g.id = m.group_id
             WHERE g.org_id = ? AND m.group_id IN ({})",
            placeholders(chunk.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, ContactId>(0))?;
        for row in rows {
            ids.insert(row?);
        }
    }
    Ok(ids)
}

/// Resolve URNs to their owning contacts, creating a contact for any URN
/// nobody owns yet. The returned map holds the exact URN requested per contact.
pub fn contact_ids_from_urns(
    conn: &Connection,
    org_id: OrgId,
    urns: &[Urn],
    now: DateTime<Utc>,
) -> Result<BTreeMap<ContactId, Urn>> {
    let mut resolved = BTreeMap::new();
    for urn in urns {
        let existing: Option<(i64, Option<ContactId>)> = conn
            .query_row(
                "SELECT id, contact_id FROM contact_urns WHERE org_id = ?1 AND identity = ?2",
                params![org_id, urn],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let contact_id = match existing {
            Some((_, Some(contact_id))) => contact_id,
            Some((urn_id, None)) => {
                let contact_id = create_contact(conn, org_id, None, None, now)?;
                conn.execute(
                    "UPDATE contact_urns SET contact_id = ?1 WHERE id = ?2",
                    params![contact_id, urn_id],
                )?;
                contact_id
            }
            None => {
                let contact_id = create_contact(conn, org_id, None, None, now)?;
                add_urn(conn, org_id, contact_id, urn, 1000)?;
                tracing::debug!("👤 Created contact {} for URN {}", contact_id, urn);
                contact_id
            }
        };
        resolved.insert(contact_id, urn.clone());
    }
    Ok(resolved)
}

/// Contacts among `ids` that currently have a waiting flow session.
pub fn contacts_with_active_sessions(
    conn: &Connection,
    org_id: OrgId,
    ids: &[ContactId],
) -> Result<HashSet<ContactId>> {
    let mut active = HashSet::new();
    for chunk in id_chunks(ids) {
        let mut args: Vec<i64> = vec![org_id.as_i64()];
        args.extend(chunk.iter().map(|id| id.as_i64()));
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT contact_id FROM flow_sessions
             WHERE org_id = ? AND status = 'W' AND contact_id IN ({})",
            placeholders(chunk.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, ContactId>(0))?;
        for row in rows {
            active.insert(row?);
        }
    }
    Ok(active)
}
