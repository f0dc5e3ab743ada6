//! # Switchyard Core
//!
//! Shared building blocks for every Switchyard crate: the error enum,
//! the TOML configuration tree and the strongly typed identifiers.

pub mod config;
pub mod error;
pub mod types;

pub use config::SwitchyardConfig;
pub use error::{Result, SwitchyardError};
pub use types::*;
