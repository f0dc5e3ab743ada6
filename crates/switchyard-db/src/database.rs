//! Shared SQLite handle.
//!
//! One connection behind a mutex: every logical operation runs through
//! [`Database::with_conn`] or [`Database::transaction`] and never holds the
//! lock across an `.await`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction};

use switchyard_core::{Result, SwitchyardError};

use crate::schema::SCHEMA;

/// Switchyard database: all tenants, all tables.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // WAL for concurrent readers; rollback journal still works without it
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            tracing::warn!("⚠️ WAL unavailable for {}: {}", path.display(), e);
        }
        let db = Self::from_connection(conn)?;
        tracing::info!("🗄️ Database opened: {}", path.display());
        Ok(db)
    }

    /// Open with an explicit busy timeout.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let db = Self::open(path)?;
        db.with_conn(|conn| Ok(conn.busy_timeout(busy_timeout)?))?;
        Ok(db)
    }

    /// In-memory database with the full schema, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SwitchyardError::Lock(e.to_string()))
    }

    /// Run `f` against the connection without a transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside a transaction: committed when `f` returns `Ok`,
    /// rolled back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!("⚠️ Rollback failed after '{e}': {rollback}");
                }
                Err(e)
            }
        }
    }
}
