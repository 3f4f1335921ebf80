use parking_lot::RwLock;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::store::Database;

/// One cached flag evaluation, keyed by `(user_id, feature_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub user_id: String,
    pub feature_id: String,
    #[serde(default)]
    pub variation_id: String,
    #[serde(default)]
    pub reason: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub evaluated_at: i64,
}

/// Durable evaluation storage with a write-through in-memory layer for the
/// active user.
///
/// Both `replace_all` and `merge` commit the new sync cursor in the same
/// transaction as the evaluation rows, so the cursor never advances past
/// data that was not durably stored.
pub struct EvaluationStore {
    db: Arc<Database>,
    cache: RwLock<HashMap<String, EvaluationRecord>>,
}

impl EvaluationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Loads the persisted evaluation set for `user_id` into the in-memory
    /// layer. Called at startup and on user switch.
    pub fn load(&self, user_id: &str) -> Result<()> {
        let records = self.db.read(|conn| Self::query_user(conn, user_id))?;

        let mut cache = self.cache.write();
        cache.clear();
        for record in records {
            cache.insert(record.feature_id.clone(), record);
        }
        Ok(())
    }

    /// Returns the cached evaluation for `feature_id`, if any.
    pub fn get(&self, feature_id: &str) -> Option<EvaluationRecord> {
        self.cache.read().get(feature_id).cloned()
    }

    /// Returns all cached evaluations for the active user.
    pub fn all(&self) -> Vec<EvaluationRecord> {
        self.cache.read().values().cloned().collect()
    }

    /// The persisted sync cursor for `user_id` (0 when never synced).
    pub fn cursor(&self, user_id: &str) -> Result<i64> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT COALESCE(
                    (SELECT evaluated_at FROM sync_state WHERE user_id = ?1),
                    0
                )",
                [user_id],
                |row| row.get(0),
            )
        })
    }

    /// Replaces the full evaluation set for `user_id` and advances the
    /// cursor, in one transaction.
    pub fn replace_all(
        &self,
        user_id: &str,
        evaluations: &[EvaluationRecord],
        cursor: i64,
    ) -> Result<()> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM evaluation WHERE user_id = ?1", [user_id])?;
            for record in evaluations {
                Self::upsert(&tx, record)?;
            }
            Self::store_cursor(&tx, user_id, cursor)?;
            tx.commit()
        })?;

        let mut cache = self.cache.write();
        cache.clear();
        for record in evaluations {
            cache.insert(record.feature_id.clone(), record.clone());
        }
        Ok(())
    }

    /// Applies a partial update: upserts `evaluations`, removes
    /// `archived_feature_ids`, and advances the cursor, in one transaction.
    pub fn merge(
        &self,
        user_id: &str,
        evaluations: &[EvaluationRecord],
        archived_feature_ids: &[String],
        cursor: i64,
    ) -> Result<()> {
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            for record in evaluations {
                Self::upsert(&tx, record)?;
            }
            for feature_id in archived_feature_ids {
                tx.execute(
                    "DELETE FROM evaluation WHERE user_id = ?1 AND feature_id = ?2",
                    params![user_id, feature_id],
                )?;
            }
            Self::store_cursor(&tx, user_id, cursor)?;
            tx.commit()
        })?;

        let mut cache = self.cache.write();
        for record in evaluations {
            cache.insert(record.feature_id.clone(), record.clone());
        }
        for feature_id in archived_feature_ids {
            cache.remove(feature_id);
        }
        Ok(())
    }

    fn upsert(conn: &Connection, record: &EvaluationRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO evaluation
                (user_id, feature_id, variation_id, reason, value, evaluated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, feature_id) DO UPDATE SET
                variation_id = excluded.variation_id,
                reason = excluded.reason,
                value = excluded.value,
                evaluated_at = excluded.evaluated_at",
            params![
                record.user_id,
                record.feature_id,
                record.variation_id,
                record.reason,
                record.value.to_string(),
                record.evaluated_at,
            ],
        )?;
        Ok(())
    }

    fn store_cursor(conn: &Connection, user_id: &str, cursor: i64) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO sync_state (user_id, evaluated_at) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET evaluated_at = excluded.evaluated_at",
            params![user_id, cursor],
        )?;
        Ok(())
    }

    fn query_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<EvaluationRecord>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, feature_id, variation_id, reason, value, evaluated_at
             FROM evaluation WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            let raw: String = row.get(4)?;
            Ok(EvaluationRecord {
                user_id: row.get(0)?,
                feature_id: row.get(1)?,
                variation_id: row.get(2)?,
                reason: row.get(3)?,
                value: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                evaluated_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}
