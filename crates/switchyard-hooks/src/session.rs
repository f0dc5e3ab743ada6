//! Flow session with per-kind event accumulation.

use std::collections::BTreeMap;

use switchyard_core::{ContactId, OrgId, SessionId};

use crate::events::{EventKind, FlowEvent};

/// One contact's run through a flow. Events recorded here stay on the
/// session until a commit succeeds.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    org_id: OrgId,
    contact_id: ContactId,
    events: BTreeMap<EventKind, Vec<FlowEvent>>,
}

impl Session {
    pub fn new(id: SessionId, org_id: OrgId, contact_id: ContactId) -> Self {
        Self {
            id,
            org_id,
            contact_id,
            events: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn org_id(&self) -> OrgId {
        self.org_id
    }

    pub fn contact_id(&self) -> ContactId {
        self.contact_id
    }

    /// Append `event` to the list of its kind.
    pub fn record(&mut self, event: FlowEvent) {
        self.events.entry(event.kind()).or_default().push(event);
    }

    /// Events of `kind` in the order they were recorded.
    pub fn events_for(&self, kind: EventKind) -> &[FlowEvent] {
        self.events.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_events(&self) -> bool {
        self.events.values().any(|v| !v.is_empty())
    }

    /// Kinds with at least one event.
    pub fn pending_kinds(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.events
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(kind, _)| *kind)
    }

    pub(crate) fn clear_events(&mut self) {
        self.events.clear();
    }
}

/// What a hook sees for one session: the session plus its events of the
/// hook's kind.
#[derive(Debug, Clone, Copy)]
pub struct SessionEvents<'a> {
    pub session: &'a Session,
    pub events: &'a [FlowEvent],
}
