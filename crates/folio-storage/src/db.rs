//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;
use tracing::info;
use uuid::Uuid;

use folio_core::error::FolioError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, FolioError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(sql_err("Failed to open database"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(sql_err("Failed to set pragmas"))?;

        info!("Database opened at {}", path.display());
        Self::migrated(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, FolioError> {
        let conn =
            Connection::open_in_memory().map_err(sql_err("Failed to open in-memory db"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(sql_err("Failed to set pragmas"))?;
        Self::migrated(conn)
    }

    fn migrated(conn: Connection) -> Result<Self, FolioError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, FolioError>
    where
        F: FnOnce(&Connection) -> Result<T, FolioError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FolioError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Build a mapper from a rusqlite error to a storage error with context.
pub(crate) fn sql_err(context: &'static str) -> impl Fn(rusqlite::Error) -> FolioError {
    move |e| FolioError::Storage(format!("{}: {}", context, e))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
            })
        })
        .transpose()
}

pub(crate) fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
