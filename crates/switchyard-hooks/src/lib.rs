//! # Switchyard Hooks
//!
//! Flow sessions accumulate events while they run. At commit time every
//! event kind is handed to exactly one pre-commit hook, which folds the
//! events of all sessions into a few bulk statements inside one transaction.

pub mod commit;
pub mod events;
pub mod hooks;
pub mod registry;
pub mod session;

pub use commit::{apply_pre_commit, commit_sessions, commit_sessions_at};
pub use events::{EventKind, FlowEvent};
pub use registry::{Hook, HookContext, HookRegistry};
pub use session::{Session, SessionEvents};
