//! Contact language: the last change of each session wins.

use rusqlite::Connection;

use switchyard_core::Result;
use switchyard_db::bulk_sql;
use switchyard_db::timestamps::format_ts;

use super::{ColumnChange, last_per_session};
use crate::events::FlowEvent;
use crate::registry::{Hook, HookContext};
use crate::session::SessionEvents;

const UPDATE_LANGUAGE_SQL: &str = "WITH r(id, language, modified_on) AS (VALUES {values})
    UPDATE contacts SET language = r.language, modified_on = r.modified_on
    FROM r WHERE contacts.id = r.id";

/// Fold language events into one change per contact.
pub fn language_changes(sessions: &[SessionEvents<'_>], modified_on: &str) -> Vec<ColumnChange> {
    last_per_session(sessions, modified_on, |event| match event {
        FlowEvent::ContactLanguageChanged { language } => Some(language.as_str()),
        _ => None,
    })
}

pub struct ContactLanguageHook;

impl Hook for ContactLanguageHook {
    fn name(&self) -> &'static str {
        "contact_language"
    }

    fn apply(&self, conn: &Connection, ctx: &HookContext<'_>, sessions: &[SessionEvents<'_>]) -> Result<()> {
        let changes = language_changes(sessions, &format_ts(ctx.now));
        bulk_sql(conn, "updating contact language", UPDATE_LANGUAGE_SQL, &changes)?;
        Ok(())
    }
}
