//! Error types shared across Switchyard crates.

use std::time::Duration;

use thiserror::Error;

/// The error type returned by every Switchyard library crate.
#[derive(Debug, Error)]
pub enum SwitchyardError {
    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any SQLite failure outside a labelled bulk statement.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A bulk statement failed; the label names the statement.
    #[error("bulk statement '{label}' failed: {source}")]
    Bulk {
        label: String,
        source: rusqlite::Error,
    },

    /// A bulk statement would bind more parameters than SQLite allows.
    #[error("bulk statement '{label}' needs {params} parameters, limit is {limit}")]
    BulkTooLarge {
        label: String,
        params: usize,
        limit: usize,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad stored data scoped to one computation (unknown unit, bad timezone...).
    #[error("data error: {0}")]
    Data(String),

    /// Events were accumulated for a kind nobody registered a hook for.
    #[error("no hook registered for event kind '{0}'")]
    MissingHook(String),

    /// A pre-commit hook failed and the whole commit was rolled back.
    #[error("hook '{kind}' failed: {source}")]
    Hook {
        kind: String,
        source: Box<SwitchyardError>,
    },

    #[error("unknown task type '{0}'")]
    UnknownTaskType(String),

    #[error("task timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("queue error: {0}")]
    Queue(String),

    #[error("courier error: {0}")]
    Courier(String),

    #[error("flow start error: {0}")]
    FlowStart(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Result alias used throughout Switchyard.
pub type Result<T> = std::result::Result<T, SwitchyardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_keeps_source() {
        let err = SwitchyardError::Hook {
            kind: "contact_language_changed".into(),
            source: Box::new(SwitchyardError::Data("bad language".into())),
        };
        assert_eq!(
            err.to_string(),
            "hook 'contact_language_changed' failed: data error: bad language"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_display() {
        let err = SwitchyardError::Timeout {
            duration: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "task timed out after 5s");
    }
}
