//! Default [`EventPipeline`] implementation.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorCode, Result};
use crate::store::{EventRecord, EventStore, EventType};
use crate::sync::{BoxFuture, EventGateway, EventPipeline, NewEventsListener};

/// Durable event queue plus delivery.
///
/// Events are persisted before any delivery attempt, and removed only once
/// the server acknowledges them; a rejected event is kept when the server
/// marks it retriable and dropped (with a warning) otherwise. That gives
/// at-least-once delivery across process suspensions.
pub struct EventInteractor {
    store: Arc<EventStore>,
    gateway: Arc<dyn EventGateway>,
    batch_size: usize,
    max_queue_size: usize,
    listener: Mutex<Option<NewEventsListener>>,
    /// Serializes flushes: only one is logically in flight per instance.
    flush_gate: Arc<tokio::sync::Mutex<()>>,
}

impl EventInteractor {
    pub fn new(
        store: Arc<EventStore>,
        gateway: Arc<dyn EventGateway>,
        batch_size: usize,
        max_queue_size: usize,
    ) -> Self {
        Self {
            store,
            gateway,
            batch_size,
            max_queue_size,
            listener: Mutex::new(None),
            flush_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn notify_listener(&self, events: &[EventRecord]) {
        let listener = self.listener.lock();
        if let Some(ref listener) = *listener {
            listener(events);
        }
    }
}

impl EventPipeline for EventInteractor {
    fn enqueue(&self, event: EventRecord) {
        match self.store.count() {
            Ok(count) if count >= self.max_queue_size => {
                tracing::warn!(
                    "event queue full ({} events), dropping oldest",
                    self.max_queue_size
                );
                let overflow = count + 1 - self.max_queue_size;
                if let Err(e) = self.store.remove_oldest(overflow) {
                    tracing::warn!("failed to trim event queue: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("failed to read event queue size: {}", e),
        }

        if let Err(e) = self.store.append(&event) {
            tracing::warn!("failed to persist event {}: {}", event.id, e);
            return;
        }

        self.notify_listener(std::slice::from_ref(&event));
    }

    fn send_events(&self, force: bool) -> BoxFuture<Result<bool>> {
        let store = Arc::clone(&self.store);
        let gateway = Arc::clone(&self.gateway);
        let batch_size = self.batch_size;
        let max_queue_size = self.max_queue_size;
        let gate = Arc::clone(&self.flush_gate);

        Box::pin(async move {
            let _flush = gate.lock().await;

            // The queue is capped at max_queue_size, so this is everything.
            let queued = store.fetch(max_queue_size)?;
            if queued.is_empty() {
                return Ok(false);
            }

            // An event already marked non-retriable means a crash landed
            // between marking and removal; purge it instead of resending.
            let (sendable, stale): (Vec<EventRecord>, Vec<EventRecord>) =
                queued.into_iter().partition(|event| event.retriable);
            if !stale.is_empty() {
                let ids: Vec<String> = stale.into_iter().map(|event| event.id).collect();
                tracing::warn!("purging {} previously rejected events", ids.len());
                store.remove(&ids)?;
            }

            if sendable.is_empty() {
                return Ok(false);
            }
            if !force && sendable.len() < batch_size {
                tracing::debug!(
                    queued = sendable.len(),
                    threshold = batch_size,
                    "batch threshold not met, skipping flush"
                );
                return Ok(false);
            }

            let ack = gateway.register_events(sendable.clone()).await?;

            let mut done = Vec::with_capacity(sendable.len());
            for mut event in sendable {
                match ack.errors.get(&event.id) {
                    None => done.push(event.id),
                    Some(error) if error.retriable => {
                        // Kept in the queue for the next flush.
                    }
                    Some(error) => {
                        // Marked durably before removal so a crash in
                        // between cannot resurrect it as sendable.
                        event.retriable = false;
                        if let Err(e) = store.append(&event) {
                            tracing::warn!("failed to mark event {}: {}", event.id, e);
                        }
                        tracing::warn!(
                            event_id = %event.id,
                            "dropping non-retriable event: {}",
                            error.message
                        );
                        done.push(event.id);
                    }
                }
            }
            store.remove(&done)?;

            Ok(true)
        })
    }

    fn set_listener(&self, listener: Option<NewEventsListener>) {
        *self.listener.lock() = listener;
    }

    fn queued(&self) -> usize {
        self.store.count().unwrap_or(0)
    }

    fn track_refresh_success(&self, elapsed: Duration, size_bytes: u64, feature_tag: &str) {
        self.enqueue(EventRecord::new(
            EventType::Metrics,
            serde_json::json!({
                "metric": "refresh_success",
                "latencyMillis": elapsed.as_millis() as u64,
                "sizeBytes": size_bytes,
                "featureTag": feature_tag,
            }),
        ));
    }

    fn track_refresh_failure(&self, code: ErrorCode, feature_tag: &str) {
        self.enqueue(EventRecord::new(
            EventType::Metrics,
            serde_json::json!({
                "metric": "refresh_failure",
                "errorCode": code.as_str(),
                "featureTag": feature_tag,
            }),
        ));
    }
}
