use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

use crate::error::{ErrorCode, FlagSyncError, Result};
use crate::store::migration;

/// Durable storage handle.
///
/// The connection sits behind a mutex: access is single-writer and serial
/// from whichever execution regime is active (foreground timer callbacks or
/// a background invocation), which is all the store is required to support.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database at `path` and brings the schema up
    /// to the current version.
    ///
    /// # Errors
    ///
    /// A failed migration step aborts initialization with
    /// `StoreMigrationFailed`; the store is unusable in that case.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            FlagSyncError::with_source(
                ErrorCode::StoreOpenError,
                format!("Failed to open database: {}", path.as_ref().display()),
                e,
            )
        })?;
        Self::prepare(conn)
    }

    /// Opens an in-memory database, used for tests and ephemeral hosts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            FlagSyncError::with_source(ErrorCode::StoreOpenError, "Failed to open database", e)
        })?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| {
            FlagSyncError::with_source(ErrorCode::StoreOpenError, "Failed to apply pragmas", e)
        })?;

        let mut conn = conn;
        migration::run(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(|e| {
            FlagSyncError::with_source(ErrorCode::StoreReadError, "Store read failed", e)
        })
    }

    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn).map_err(|e| {
            FlagSyncError::with_source(ErrorCode::StoreWriteError, "Store write failed", e)
        })
    }

    /// The persisted schema version.
    pub fn schema_version(&self) -> Result<i32> {
        self.read(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get(0)))
    }
}
