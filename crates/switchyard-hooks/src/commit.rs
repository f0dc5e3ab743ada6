//! Commit protocol: run every pending kind's hook once, in kind order,
//! inside one transaction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use switchyard_core::{Result, SwitchyardError};
use switchyard_db::{Database, OrgAssets};

use crate::events::EventKind;
use crate::registry::{HookContext, HookRegistry};
use crate::session::{Session, SessionEvents};

/// Apply the hooks for every kind with pending events on `sessions`.
///
/// Runs on the caller's transaction and commits nothing. A kind without a
/// hook or a failing hook aborts with an error naming the kind.
pub fn apply_pre_commit(
    conn: &Connection,
    registry: &HookRegistry,
    ctx: &HookContext<'_>,
    sessions: &[Session],
) -> Result<()> {
    let org_id = ctx.assets.org_id();
    if let Some(stray) = sessions.iter().find(|s| s.org_id() != org_id) {
        return Err(SwitchyardError::Data(format!(
            "session {} belongs to org {}, commit is for org {}",
            stray.id(),
            stray.org_id(),
            org_id
        )));
    }

    let kinds: BTreeSet<EventKind> = sessions.iter().flat_map(|s| s.pending_kinds()).collect();
    for kind in kinds {
        let hook = registry
            .get(kind)
            .ok_or_else(|| SwitchyardError::MissingHook(kind.to_string()))?;

        let batch: Vec<SessionEvents<'_>> = sessions
            .iter()
            .filter_map(|session| {
                let events = session.events_for(kind);
                (!events.is_empty()).then_some(SessionEvents { session, events })
            })
            .collect();

        tracing::debug!(
            "🪝 Applying '{}' to {} sessions (org {})",
            hook.name(),
            batch.len(),
            org_id
        );
        hook.apply(conn, ctx, &batch).map_err(|e| {
            tracing::error!("❌ Hook '{}' failed (org {}): {}", hook.name(), org_id, e);
            SwitchyardError::Hook {
                kind: kind.to_string(),
                source: Box::new(e),
            }
        })?;
    }
    Ok(())
}

/// Commit the accumulated events of `sessions` at the current time.
pub fn commit_sessions(
    db: &Database,
    registry: &HookRegistry,
    assets: &OrgAssets,
    sessions: &mut [Session],
) -> Result<()> {
    commit_sessions_at(db, registry, assets, sessions, Utc::now())
}

/// Commit the accumulated events of `sessions` in one transaction. The
/// sessions' events are cleared only when the transaction commits.
pub fn commit_sessions_at(
    db: &Database,
    registry: &HookRegistry,
    assets: &OrgAssets,
    sessions: &mut [Session],
    now: DateTime<Utc>,
) -> Result<()> {
    if !sessions.iter().any(Session::has_events) {
        return Ok(());
    }

    let ctx = HookContext { assets, now };
    let pending: &[Session] = sessions;
    db.transaction(|tx| apply_pre_commit(tx, registry, &ctx, pending))?;

    for session in sessions.iter_mut() {
        session.clear_events();
    }
    tracing::info!("💾 Committed {} sessions (org {})", sessions.len(), assets.org_id());
    Ok(())
}
