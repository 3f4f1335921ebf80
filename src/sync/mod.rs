//! Collaborator interfaces between the scheduled tasks and the wire layer.
//!
//! `EvaluationSync` and `EventPipeline` are what the foreground and
//! background tasks drive; the gateway traits underneath them are the wire
//! seam, implemented by the reqwest [`crate::api::ApiClient`] in production
//! and by mocks in tests.

mod evaluation;
mod events;

pub use evaluation::EvaluationInteractor;
pub use events::EventInteractor;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{ErrorCode, Result};
use crate::store::{EvaluationRecord, EventRecord};
use crate::user::UserContext;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// How a refresh response is to be applied to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// Replace the full evaluation set.
    Full,
    /// Merge a partial update and remove archived features.
    Partial,
}

/// A refresh response plus its transfer measurements.
#[derive(Debug, Clone)]
pub struct RefreshPayload {
    pub kind: RefreshKind,
    pub evaluations: Vec<EvaluationRecord>,
    pub archived_feature_ids: Vec<String>,
    /// New sync cursor; monotonically advances on success.
    pub cursor: i64,
    pub elapsed: Duration,
    pub size_bytes: u64,
}

/// Summary of one completed refresh, fed into success telemetry.
#[derive(Debug, Clone)]
pub struct RefreshSummary {
    pub elapsed: Duration,
    pub size_bytes: u64,
    pub feature_tag: String,
    /// Whether the local cache changed.
    pub updated: bool,
}

/// Per-event rejection reported by the server.
#[derive(Debug, Clone)]
pub struct EventError {
    pub retriable: bool,
    pub message: String,
}

/// Acknowledgement for a flushed batch: ids absent from `errors` were
/// accepted.
#[derive(Debug, Clone, Default)]
pub struct EventAck {
    pub errors: HashMap<String, EventError>,
}

/// Wire seam for evaluation refreshes.
pub trait EvaluationGateway: Send + Sync {
    fn get_evaluations(
        &self,
        user: UserContext,
        cursor: i64,
        attributes_updated: bool,
        feature_tag: String,
        timeout: Option<Duration>,
    ) -> BoxFuture<Result<RefreshPayload>>;
}

/// Wire seam for event delivery.
pub trait EventGateway: Send + Sync {
    fn register_events(&self, events: Vec<EventRecord>) -> BoxFuture<Result<EventAck>>;
}

/// Fetches the current user's evaluations and updates the local cache.
pub trait EvaluationSync: Send + Sync {
    /// One refresh. `timeout` of `None` uses the collaborator default.
    fn fetch(&self, user: UserContext, timeout: Option<Duration>)
        -> BoxFuture<Result<RefreshSummary>>;
}

/// Listener invoked whenever new events are appended to the queue.
pub type NewEventsListener = Box<dyn Fn(&[EventRecord]) + Send + Sync>;

/// Buffers events durably and delivers them at-least-once.
pub trait EventPipeline: Send + Sync {
    /// Appends an event to the durable queue and notifies the listener.
    fn enqueue(&self, event: EventRecord);

    /// Flushes queued events. A non-forced flush sends only when the batch
    /// threshold is met. Returns whether anything was sent.
    fn send_events(&self, force: bool) -> BoxFuture<Result<bool>>;

    /// Installs the queue-growth listener; exactly one is active at a time
    /// and `None` deregisters.
    fn set_listener(&self, listener: Option<NewEventsListener>);

    /// Number of events currently queued.
    fn queued(&self) -> usize;

    fn track_refresh_success(&self, elapsed: Duration, size_bytes: u64, feature_tag: &str);

    fn track_refresh_failure(&self, code: ErrorCode, feature_tag: &str);
}
