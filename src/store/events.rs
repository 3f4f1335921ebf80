use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::store::Database;

/// Kind of a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// SDK-internal telemetry (refresh latency, payload size, failures).
    Metrics,
    /// Host-application tracking call.
    Custom,
}

/// A queued analytics event.
///
/// Created on a tracking call, appended durably, included in flush batches,
/// and removed only after the server acknowledges it (or rejects it as
/// non-retriable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Locally generated, unique.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    /// Cleared when the server rejects the event as non-retriable, just
    /// before it is dropped from the queue.
    #[serde(default = "default_retriable")]
    pub retriable: bool,
}

fn default_retriable() -> bool {
    true
}

impl EventRecord {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retriable: true,
        }
    }
}

/// Durable FIFO event queue.
///
/// Delivery order follows insertion order; rows are only removed through
/// [`EventStore::remove`] after the flush outcome is known.
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, event: &EventRecord) -> Result<()> {
        let body = serde_json::to_string(event).unwrap_or_default();
        self.db.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO event (id, event) VALUES (?1, ?2)",
                params![event.id, body],
            )?;
            Ok(())
        })
    }

    /// Returns up to `limit` events in insertion order.
    pub fn fetch(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.db.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT event FROM event ORDER BY rowid ASC LIMIT ?1")?;
            let rows = stmt.query_map([limit as i64], |row| {
                let raw: String = row.get(0)?;
                Ok(raw)
            })?;

            let mut events = Vec::new();
            for raw in rows {
                match serde_json::from_str::<EventRecord>(&raw?) {
                    Ok(event) => events.push(event),
                    Err(e) => tracing::warn!("skipping undecodable queued event: {}", e),
                }
            }
            Ok(events)
        })
    }

    pub fn remove(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.write(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for id in ids {
                removed += tx.execute("DELETE FROM event WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    /// Drops the `count` oldest events, used when the queue is at capacity.
    pub fn remove_oldest(&self, count: usize) -> Result<usize> {
        self.db.write(|conn| {
            conn.execute(
                "DELETE FROM event WHERE rowid IN
                    (SELECT rowid FROM event ORDER BY rowid ASC LIMIT ?1)",
                [count as i64],
            )
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.db.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM event", [], |row| {
                row.get::<_, i64>(0).map(|n| n as usize)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EventStore {
        EventStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_append_and_count() {
        let store = store();
        assert_eq!(store.count().unwrap(), 0);

        store
            .append(&EventRecord::new(EventType::Custom, serde_json::json!({})))
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_fetch_preserves_insertion_order() {
        let store = store();
        for i in 0..5 {
            store
                .append(&EventRecord::new(
                    EventType::Custom,
                    serde_json::json!({ "seq": i }),
                ))
                .unwrap();
        }

        let events = store.fetch(10).unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.payload["seq"], serde_json::json!(i));
        }
    }

    #[test]
    fn test_fetch_respects_limit() {
        let store = store();
        for _ in 0..5 {
            store
                .append(&EventRecord::new(EventType::Custom, serde_json::json!({})))
                .unwrap();
        }
        assert_eq!(store.fetch(3).unwrap().len(), 3);
    }

    #[test]
    fn test_remove_by_id() {
        let store = store();
        let keep = EventRecord::new(EventType::Custom, serde_json::json!({"k": "keep"}));
        let gone = EventRecord::new(EventType::Custom, serde_json::json!({"k": "gone"}));
        store.append(&keep).unwrap();
        store.append(&gone).unwrap();

        let removed = store.remove(&[gone.id.clone()]).unwrap();
        assert_eq!(removed, 1);

        let remaining = store.fetch(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep.id);
    }

    #[test]
    fn test_remove_oldest() {
        let store = store();
        let mut ids = Vec::new();
        for i in 0..4 {
            let event = EventRecord::new(EventType::Custom, serde_json::json!({ "seq": i }));
            ids.push(event.id.clone());
            store.append(&event).unwrap();
        }

        store.remove_oldest(2).unwrap();

        let remaining = store.fetch(10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].id, ids[2]);
        assert_eq!(remaining[1].id, ids[3]);
    }

    #[test]
    fn test_missing_retriable_field_defaults_to_true() {
        // Rows written by older builds carry no retriable flag.
        let json = r#"{"id":"e1","type":"custom","payload":{},"timestamp":1}"#;
        let event: EventRecord = serde_json::from_str(json).unwrap();
        assert!(event.retriable);
    }

    #[test]
    fn test_retriable_mark_survives_rewrite() {
        let store = store();
        let mut event = EventRecord::new(EventType::Custom, serde_json::json!({}));
        store.append(&event).unwrap();

        event.retriable = false;
        store.append(&event).unwrap();

        let events = store.fetch(10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].retriable);
    }

    #[test]
    fn test_events_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.db");

        let event = EventRecord::new(EventType::Custom, serde_json::json!({"durable": true}));
        {
            let store = EventStore::new(Arc::new(Database::open(&path).unwrap()));
            store.append(&event).unwrap();
        }

        let store = EventStore::new(Arc::new(Database::open(&path).unwrap()));
        let events = store.fetch(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
    }
}
