//! SQLite persistence for wizard snapshots
//!
//! One row per wizard key. Any number of wizards can share a database file;
//! each `SqlitePersistence` adapter is bound to one key.

mod schema;

pub use schema::*;

use crate::error::PersistenceError;
use crate::runtime::PersistenceAdapter;
use crate::state_machine::{PersistedState, WizardState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Snapshot Operations ====================

    /// Insert or replace the snapshot stored under `key`
    pub fn save_snapshot(&self, key: &str, step: &str, state_json: &str) -> DbResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO wizard_snapshots (key, step, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET
                step = excluded.step,
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![key, step, state_json, now],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, key: &str) -> DbResult<SnapshotRecord> {
        self.find_snapshot(key)?
            .ok_or_else(|| DbError::SnapshotNotFound(key.to_string()))
    }

    pub fn find_snapshot(&self, key: &str) -> DbResult<Option<SnapshotRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT key, step, state, created_at, updated_at
                 FROM wizard_snapshots WHERE key = ?1",
                params![key],
                parse_snapshot_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Returns whether a row was removed
    pub fn delete_snapshot(&self, key: &str) -> DbResult<bool> {
        let conn = self.conn.lock();
        let affected = conn.execute("DELETE FROM wizard_snapshots WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }

    /// Keys of all stored snapshots, most recently updated first
    pub fn list_keys(&self) -> DbResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM wizard_snapshots ORDER BY updated_at DESC, key")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_snapshot_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        key: row.get(0)?,
        step: row.get(1)?,
        state: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

// ============================================================================
// Adapter
// ============================================================================

/// Persistence adapter storing one wizard's state under `key`
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    db: Database,
    key: String,
}

impl SqlitePersistence {
    pub fn new(db: Database, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl PersistenceAdapter for SqlitePersistence {
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(state)?;
        self.db.save_snapshot(&self.key, &state.step, &json)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        match self.db.find_snapshot(&self.key)? {
            Some(record) => Ok(Some(serde_json::from_str(&record.state)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.db.delete_snapshot(&self.key)?;
        Ok(())
    }
}
