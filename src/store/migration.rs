//! Versioned schema migrations.
//!
//! The persisted version lives in `PRAGMA user_version`. Steps are applied
//! in strictly increasing order inside a single transaction with the
//! version written last, so a failing step rolls the store back to the
//! version it started from, never a partially migrated one.

use rusqlite::{Connection, Transaction};

use crate::error::{ErrorCode, FlagSyncError, Result};

/// Target schema version.
pub const SCHEMA_VERSION: i32 = 3;

pub(crate) struct Migration {
    /// The version this step migrates *to*.
    pub version: i32,
    pub apply: fn(&Transaction) -> rusqlite::Result<()>,
}

pub(crate) fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            apply: apply_v1,
        },
        Migration {
            version: 2,
            apply: apply_v2,
        },
        Migration {
            version: 3,
            apply: apply_v3,
        },
    ]
}

/// Initial schema: evaluation rows and the durable event queue.
fn apply_v1(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE evaluation (
            user_id TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            evaluation TEXT NOT NULL
        );
        CREATE TABLE event (
            id TEXT PRIMARY KEY,
            event TEXT NOT NULL
        );",
    )
}

/// Adds the per-user sync cursor.
fn apply_v2(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE TABLE sync_state (
            user_id TEXT PRIMARY KEY,
            evaluated_at INTEGER NOT NULL DEFAULT 0,
            feature_tag TEXT
        );
        CREATE INDEX idx_evaluation_user ON evaluation(user_id);",
    )
}

/// Rebuilds the evaluation table with a composite primary key and typed
/// columns. This is the one full-replace step: existing evaluation rows are
/// dropped and the cursor reset, forcing a fresh full refresh.
fn apply_v3(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "DROP TABLE evaluation;
        CREATE TABLE evaluation (
            user_id TEXT NOT NULL,
            feature_id TEXT NOT NULL,
            variation_id TEXT NOT NULL DEFAULT '',
            reason TEXT NOT NULL DEFAULT '',
            value TEXT NOT NULL,
            evaluated_at INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, feature_id)
        );
        UPDATE sync_state SET evaluated_at = 0;",
    )
}

/// Brings `conn` up to [`SCHEMA_VERSION`].
pub(crate) fn run(conn: &mut Connection) -> Result<()> {
    run_steps(conn, SCHEMA_VERSION, &migrations())
}

fn run_steps(conn: &mut Connection, target: i32, steps: &[Migration]) -> Result<()> {
    let current: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| {
            FlagSyncError::with_source(
                ErrorCode::StoreMigrationFailed,
                "Failed to read schema version",
                e,
            )
        })?;

    if current == target {
        return Ok(());
    }

    if current > target {
        return Err(FlagSyncError::new(
            ErrorCode::StoreMigrationFailed,
            format!(
                "Store schema version {} is newer than supported version {}",
                current, target
            ),
        ));
    }

    let tx = conn.transaction().map_err(|e| {
        FlagSyncError::with_source(
            ErrorCode::StoreMigrationFailed,
            "Failed to begin migration transaction",
            e,
        )
    })?;

    let mut expected = current + 1;
    for step in steps.iter().filter(|s| s.version > current && s.version <= target) {
        if step.version != expected {
            return Err(FlagSyncError::new(
                ErrorCode::StoreMigrationFailed,
                format!("Missing migration step to version {}", expected),
            ));
        }

        (step.apply)(&tx).map_err(|e| {
            FlagSyncError::with_source(
                ErrorCode::StoreMigrationFailed,
                format!("Migration to version {} failed", step.version),
                e,
            )
        })?;
        tracing::debug!(version = step.version, "applied migration step");
        expected += 1;
    }

    if expected != target + 1 {
        return Err(FlagSyncError::new(
            ErrorCode::StoreMigrationFailed,
            format!("Missing migration step to version {}", expected),
        ));
    }

    tx.pragma_update(None, "user_version", target).map_err(|e| {
        FlagSyncError::with_source(
            ErrorCode::StoreMigrationFailed,
            "Failed to write schema version",
            e,
        )
    })?;

    tx.commit().map_err(|e| {
        FlagSyncError::with_source(
            ErrorCode::StoreMigrationFailed,
            "Failed to commit migration",
            e,
        )
    })?;

    tracing::info!(from = current, to = target, "store schema migrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version_of(conn: &Connection) -> i32 {
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_fresh_database_runs_all_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();

        assert_eq!(version_of(&conn), SCHEMA_VERSION);
        assert!(table_exists(&conn, "evaluation"));
        assert!(table_exists(&conn, "event"));
        assert!(table_exists(&conn, "sync_state"));
    }

    #[test]
    fn test_migration_is_idempotent_at_target() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        assert_eq!(version_of(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_steps_apply_in_order_from_persisted_version() {
        let mut conn = Connection::open_in_memory().unwrap();

        // Persisted version 1: only the v1 schema exists.
        run_steps(&mut conn, 1, &migrations()).unwrap();
        assert_eq!(version_of(&conn), 1);
        assert!(!table_exists(&conn, "sync_state"));

        // 1 -> 3 applies 2 then 3, never skipping a step.
        run_steps(&mut conn, 3, &migrations()).unwrap();
        assert_eq!(version_of(&conn), 3);
        assert!(table_exists(&conn, "sync_state"));

        // The v3 rebuild produced the composite-key table.
        let has_pk: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('evaluation') WHERE pk > 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_pk, 2);
    }

    #[test]
    fn test_failing_step_rolls_back_to_starting_version() {
        fn failing(_tx: &Transaction) -> rusqlite::Result<()> {
            Err(rusqlite::Error::InvalidQuery)
        }

        let mut conn = Connection::open_in_memory().unwrap();
        run_steps(&mut conn, 1, &migrations()).unwrap();
        assert_eq!(version_of(&conn), 1);

        let mut steps = migrations();
        steps[2].apply = failing;

        // Forced failure at 2 -> 3: version stays at 1, not partially at 2.
        let err = run_steps(&mut conn, 3, &steps).unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreMigrationFailed);
        assert_eq!(version_of(&conn), 1);
        assert!(!table_exists(&conn, "sync_state"));
    }

    #[test]
    fn test_newer_persisted_version_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();

        let err = run(&mut conn).unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreMigrationFailed);
    }

    #[test]
    fn test_missing_step_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut steps = migrations();
        steps.remove(1);

        let err = run_steps(&mut conn, 3, &steps).unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreMigrationFailed);
        assert_eq!(version_of(&conn), 0);
    }
}
