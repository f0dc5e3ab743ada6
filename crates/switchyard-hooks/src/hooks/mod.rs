//! Built-in contact hooks.

mod fields;
mod language;
mod name;

pub use fields::{ContactFieldsHook, FieldChange, field_changes};
pub use language::{ContactLanguageHook, language_changes};
pub use name::{ContactNameHook, name_changes};

use rusqlite::types::Value;

use switchyard_core::ContactId;
use switchyard_db::BulkRow;

use crate::events::FlowEvent;
use crate::session::SessionEvents;

/// New value of one nullable contact column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChange {
    pub contact_id: ContactId,
    /// `None` clears the column.
    pub value: Option<String>,
    pub modified_on: String,
}

impl BulkRow for ColumnChange {
    const COLUMNS: usize = 3;

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.contact_id.as_i64()),
            self.value.clone().map(Value::Text).unwrap_or(Value::Null),
            Value::Text(self.modified_on.clone()),
        ]
    }
}

/// One change per session: the value carried by its last event, as picked
/// by `pick`. Empty strings clear.
fn last_per_session(
    sessions: &[SessionEvents<'_>],
    modified_on: &str,
    pick: impl Fn(&FlowEvent) -> Option<&str>,
) -> Vec<ColumnChange> {
    sessions
        .iter()
        .filter_map(|s| {
            let last = s.events.iter().rev().find_map(&pick)?;
            Some(ColumnChange {
                contact_id: s.session.contact_id(),
                value: (!last.is_empty()).then(|| last.to_string()),
                modified_on: modified_on.to_string(),
            })
        })
        .collect()
}
