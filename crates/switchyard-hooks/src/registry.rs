//! Hook trait and the registry built at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use switchyard_core::Result;
use switchyard_db::OrgAssets;

use crate::events::EventKind;
use crate::hooks::{ContactFieldsHook, ContactLanguageHook, ContactNameHook};
use crate::session::SessionEvents;

/// Shared inputs of one commit.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub assets: &'a OrgAssets,
    pub now: DateTime<Utc>,
}

/// Folds the events of one kind, across all sessions of a commit, into
/// database changes on the commit's transaction.
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, conn: &Connection, ctx: &HookContext<'_>, sessions: &[SessionEvents<'_>]) -> Result<()>;
}

/// One hook per event kind.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<EventKind, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in contact hooks.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EventKind::ContactLanguageChanged, Arc::new(ContactLanguageHook));
        registry.register(EventKind::ContactNameChanged, Arc::new(ContactNameHook));
        registry.register(EventKind::ContactFieldChanged, Arc::new(ContactFieldsHook));
        registry
    }

    /// Register `hook` for `kind`, replacing any earlier one.
    pub fn register(&mut self, kind: EventKind, hook: Arc<dyn Hook>) {
        let name = hook.name();
        if let Some(old) = self.hooks.insert(kind, hook) {
            tracing::warn!(
                "⚠️ Hook for '{}' registered twice: '{}' replaces '{}'",
                kind,
                name,
                old.name()
            );
        } else {
            tracing::debug!("🪝 Hook registered: {} → {}", kind, name);
        }
    }

    pub fn get(&self, kind: EventKind) -> Option<&Arc<dyn Hook>> {
        self.hooks.get(&kind)
    }

    /// Kinds with a hook, in commit order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.hooks.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    impl Hook for Noop {
        fn name(&self) -> &'static str {
            self.0
        }

        fn apply(&self, _: &Connection, _: &HookContext<'_>, _: &[SessionEvents<'_>]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = HookRegistry::with_defaults();
        assert_eq!(registry.kinds(), EventKind::ALL.to_vec());
    }

    #[test]
    fn test_second_registration_replaces() {
        let mut registry = HookRegistry::new();
        registry.register(EventKind::ContactNameChanged, Arc::new(Noop("first")));
        registry.register(EventKind::ContactNameChanged, Arc::new(Noop("second")));
        assert_eq!(registry.kinds().len(), 1);
        assert_eq!(registry.get(EventKind::ContactNameChanged).unwrap().name(), "second");
    }
}
