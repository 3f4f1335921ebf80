//! Foreground event delivery task.
//!
//! Two triggers feed delivery: a recurring timer that forces a flush of
//! whatever is queued, and a queue-growth signal that attempts a
//! threshold-gated flush whenever new events are appended. A growth flush
//! that actually delivers rebases the timer, so the periodic flush always
//! measures from the last successful delivery.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::sync::EventPipeline;
use crate::task::timer::{RecurringTimer, TimerCallback};
use crate::task::ScheduledTask;

pub struct EventFlusher {
    core: Arc<FlusherCore>,
}

struct FlusherCore {
    events: Arc<dyn EventPipeline>,
    flush_interval: Duration,
    timer: RecurringTimer,
    growth_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl EventFlusher {
    pub fn new(events: Arc<dyn EventPipeline>, flush_interval: Duration) -> Self {
        Self {
            core: Arc::new(FlusherCore {
                events,
                flush_interval,
                timer: RecurringTimer::new(),
                growth_tx: Mutex::new(None),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.core.timer.is_active()
    }
}

impl ScheduledTask for EventFlusher {
    fn start(&self) {
        let core = &self.core;
        core.timer
            .start(core.flush_interval, FlusherCore::timer_callback(core));

        // Coalescing growth signal: a full channel means a flush attempt is
        // already pending, so drops are harmless.
        let (tx, mut rx) = mpsc::channel::<()>(1);
        *core.growth_tx.lock() = Some(tx.clone());

        let worker = Arc::clone(core);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match worker.events.send_events(false).await {
                    Ok(true) => {
                        // Delivered: restart the periodic countdown.
                        worker
                            .timer
                            .start(worker.flush_interval, FlusherCore::timer_callback(&worker));
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!("queue-growth flush failed: {}", e),
                }
            }
        });

        core.events.set_listener(Some(Box::new(move |_| {
            let _ = tx.try_send(());
        })));
        tracing::debug!(
            interval_ms = core.flush_interval.as_millis() as u64,
            "event flusher started"
        );
    }

    fn stop(&self) {
        self.core.events.set_listener(None);
        // Dropping the sender ends the growth worker.
        self.core.growth_tx.lock().take();
        self.core.timer.stop();
        tracing::debug!("event flusher stopped");
    }
}

impl FlusherCore {
    fn timer_callback(core: &Arc<FlusherCore>) -> TimerCallback {
        let core = Arc::clone(core);
        Arc::new(move || {
            let core = Arc::clone(&core);
            Box::pin(async move {
                if let Err(e) = core.events.send_events(true).await {
                    tracing::warn!("scheduled flush failed: {}", e);
                }
            })
        })
    }
}
