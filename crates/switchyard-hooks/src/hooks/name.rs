//! Contact name: the last change of each session wins.

use rusqlite::Connection;

use switchyard_core::Result;
use switchyard_db::bulk_sql;
use switchyard_db::timestamps::format_ts;

use super::{ColumnChange, last_per_session};
use crate::events::FlowEvent;
use crate::registry::{Hook, HookContext};
use crate::session::SessionEvents;

const UPDATE_NAME_SQL: &str = "WITH r(id, name, modified_on) AS (VALUES {values})
    UPDATE contacts SET name = r.name, modified_on = r.modified_on
    FROM r WHERE contacts.id = r.id";

pub fn name_changes(sessions: &[SessionEvents<'_>], modified_on: &str) -> Vec<ColumnChange> {
    last_per_session(sessions, modified_on, |event| match event {
        FlowEvent::ContactNameChanged { name } => Some(name.as_str()),
        _ => None,
    })
}

pub struct ContactNameHook;

impl Hook for ContactNameHook {
    fn name(&self) -> &'static str {
        "contact_name"
    }

    fn apply(&self, conn: &Connection, ctx: &HookContext<'_>, sessions: &[SessionEvents<'_>]) -> Result<()> {
        let changes = name_changes(sessions, &format_ts(ctx.now));
        bulk_sql(conn, "updating contact name", UPDATE_NAME_SQL, &changes)?;
        Ok(())
    }
}
