//! Tiered local storage: a durable SQLite layer with versioned schema
//! migrations, plus a write-through in-memory cache for the active user's
//! evaluations.

mod database;
mod evaluations;
mod events;
mod migration;

pub use database::Database;
pub use evaluations::{EvaluationRecord, EvaluationStore};
pub use events::{EventRecord, EventStore, EventType};
