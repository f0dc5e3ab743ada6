//! Contact fields: per session, the last value of each field key wins and
//! every distinct key is applied. Campaign fires relative to a changed key
//! are recomputed in the same transaction.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use rusqlite::Connection;
use rusqlite::types::Value;

use switchyard_campaigns::reschedule_contact_fires;
use switchyard_core::{ContactId, FieldId, Result};
use switchyard_db::contacts::load_contacts;
use switchyard_db::{BulkRow, OrgAssets, bulk_sql};

use crate::events::FlowEvent;
use crate::registry::{Hook, HookContext};
use crate::session::SessionEvents;

/// The final value of one field for one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub contact_id: ContactId,
    pub field_id: FieldId,
    pub key: String,
    /// `None` removes the value.
    pub value: Option<String>,
}

struct FieldUpsert<'a>(&'a FieldChange, &'a str);

impl BulkRow for FieldUpsert<'_> {
    const COLUMNS: usize = 3;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.0.contact_id.as_i64()),
            Value::Integer(self.0.field_id.as_i64()),
            Value::Text(self.1.to_string()),
        ]
    }
}

struct FieldClear<'a>(&'a FieldChange);

impl BulkRow for FieldClear<'_> {
    const COLUMNS: usize = 2;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.0.contact_id.as_i64()),
            Value::Integer(self.0.field_id.as_i64()),
        ]
    }
}

const UPSERT_VALUES_SQL: &str = "INSERT INTO contact_field_values (contact_id, field_id, value)
    VALUES {values}
    ON CONFLICT (contact_id, field_id) DO UPDATE SET value = excluded.value";

const CLEAR_VALUES_SQL: &str = "WITH r(contact_id, field_id) AS (VALUES {values})
    DELETE FROM contact_field_values WHERE EXISTS (
        SELECT 1 FROM r WHERE r.contact_id = contact_field_values.contact_id
            AND r.field_id = contact_field_values.field_id
    )";

/// Fold field events into one change per (contact, key). Keys the org does
/// not define are logged and dropped.
pub fn field_changes(assets: &OrgAssets, sessions: &[SessionEvents<'_>]) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for s in sessions {
        let mut last: BTreeMap<&str, Option<&str>> = BTreeMap::new();
        for event in s.events {
            if let FlowEvent::ContactFieldChanged { field, value } = event {
                last.insert(field.as_str(), value.as_deref());
            }
        }

        for (key, value) in last {
            let Some(field) = assets.field(key) else {
                tracing::warn!(
                    "⚠️ Session {} set unknown field '{}' on contact {} (org {}), skipping",
                    s.session.id(),
                    key,
                    s.session.contact_id(),
                    assets.org_id()
                );
                continue;
            };
            changes.push(FieldChange {
                contact_id: s.session.contact_id(),
                field_id: field.id,
                key: key.to_string(),
                value: value.filter(|v| !v.is_empty()).map(str::to_string),
            });
        }
    }
    changes
}

pub struct ContactFieldsHook;

impl Hook for ContactFieldsHook {
    fn name(&self) -> &'static str {
        "contact_fields"
    }

    fn apply(&self, conn: &Connection, ctx: &HookContext<'_>, sessions: &[SessionEvents<'_>]) -> Result<()> {
        let changes = field_changes(ctx.assets, sessions);
        if changes.is_empty() {
            return Ok(());
        }

        let upserts: Vec<FieldUpsert<'_>> = changes
            .iter()
            .filter_map(|c| c.value.as_deref().map(|v| FieldUpsert(c, v)))
            .collect();
        let clears: Vec<FieldClear<'_>> = changes
            .iter()
            .filter(|c| c.value.is_none())
            .map(FieldClear)
            .collect();
        bulk_sql(conn, "updating contact field values", UPSERT_VALUES_SQL, &upserts)?;
        bulk_sql(conn, "clearing contact field values", CLEAR_VALUES_SQL, &clears)?;

        let keys: HashSet<String> = changes.iter().map(|c| c.key.clone()).collect();
        if keys.iter().all(|k| ctx.assets.campaigns.events_for_key(k).is_empty()) {
            return Ok(());
        }

        let ids: Vec<ContactId> = changes
            .iter()
            .map(|c| c.contact_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let contacts = load_contacts(conn, ctx.assets.org_id(), &ids)?;
        reschedule_contact_fires(conn, ctx.assets, ctx.now, &contacts, Some(&keys))?;
        Ok(())
    }
}
