//! # Switchyard DB
//!
//! SQLite-backed storage for the tables the workers read and write:
//! - `database`: connection wrapper, migrations, transactions
//! - `bulk`: one-statement bulk mutations from inline VALUES lists
//! - `orgs`, `contacts`, `campaigns`, `fires`, `broadcasts`, `msgs`: model stores
//! - `assets`: per-tenant snapshot handed to hooks and schedulers

pub mod assets;
pub mod broadcasts;
pub mod bulk;
pub mod campaigns;
pub mod contacts;
pub mod database;
pub mod fires;
pub mod msgs;
pub mod orgs;
mod schema;
pub mod timestamps;

pub use assets::OrgAssets;
pub use bulk::{BulkRow, bulk_sql};
pub use database::Database;
