//! Events a flow session produces.

use serde::{Deserialize, Serialize};

/// Event kinds, in the order their hooks run at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ContactLanguageChanged,
    ContactNameChanged,
    ContactFieldChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ContactLanguageChanged,
        EventKind::ContactNameChanged,
        EventKind::ContactFieldChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ContactLanguageChanged => "contact_language_changed",
            EventKind::ContactNameChanged => "contact_name_changed",
            EventKind::ContactFieldChanged => "contact_field_changed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by a running flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// Empty language clears it.
    ContactLanguageChanged { language: String },
    /// Empty name clears it.
    ContactNameChanged { name: String },
    /// `value: None` clears the field.
    ContactFieldChanged { field: String, value: Option<String> },
}

impl FlowEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FlowEvent::ContactLanguageChanged { .. } => EventKind::ContactLanguageChanged,
            FlowEvent::ContactNameChanged { .. } => EventKind::ContactNameChanged,
            FlowEvent::ContactFieldChanged { .. } => EventKind::ContactFieldChanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_is_declaration_order() {
        let mut kinds = EventKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, EventKind::ALL.to_vec());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = FlowEvent::ContactFieldChanged {
            field: "age".into(),
            value: Some("31".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "contact_field_changed");
        assert_eq!(json["field"], "age");
        assert_eq!(event.kind(), EventKind::ContactFieldChanged);
    }
}
