//! Shared connection and schema.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// `SQLite` datetime format (UTC, no timezone suffix)
pub(crate) const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Idempotent DDL for the pipeline tables
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS etl_batches (
    id TEXT PRIMARY KEY,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT,
    result TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_etl_batches_pipeline ON etl_batches (pipeline, status);

CREATE TABLE IF NOT EXISTS etl_staging (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    source TEXT NOT NULL,
    payload BLOB NOT NULL,
    extracted_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_etl_staging_batch ON etl_staging (batch_id);

CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// A SQLite database holding the ledger, staging, cache and warehouse tables.
///
/// Clones share one connection. Create with [`SqliteStore::open`] for file
/// backed persistence or [`SqliteStore::in_memory`] for tests.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the connection lock
    pub(crate) fn lock_conn<E>(&self, poisoned: E) -> std::result::Result<MutexGuard<'_, Connection>, E> {
        self.conn.lock().map_err(|_| poisoned)
    }
}

pub(crate) fn to_sqlite(ts: DateTime<Utc>) -> String {
    ts.format(SQLITE_DATETIME_FMT).to_string()
}

/// Parse a stored timestamp, reporting failures against column `idx`
pub(crate) fn from_sqlite(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT)
        .map(|ndt| ndt.and_utc())
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn conversion_error(
    idx: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
}
