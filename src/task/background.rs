//! Background counterparts of the foreground tasks.
//!
//! While backgrounded the app cannot rely on its own timers; work is
//! instead handed to a deferred-execution broker as one-shot requests
//! with an earliest start and an execution budget. Each completed run
//! submits the next request, so the chain persists until canceled.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::sync::{BoxFuture, EvaluationSync, EventPipeline};
use crate::task::ScheduledTask;
use crate::user::UserHolder;

pub const BACKGROUND_REFRESH_TASK_ID: &str = "flagsync.background.refresh";
pub const BACKGROUND_FLUSH_TASK_ID: &str = "flagsync.background.flush";

/// Work body of a deferred request. Returns whether the run succeeded.
pub type DeferredHandler = Arc<dyn Fn() -> BoxFuture<bool> + Send + Sync>;

/// A one-shot unit of deferred work.
pub struct DeferredRequest {
    /// Stable identifier; a resubmission with the same identifier replaces
    /// the pending request.
    pub identifier: String,
    /// Do not run before this much time has passed.
    pub earliest_delay: Duration,
    /// Execution budget; a handler still running past it is abandoned.
    pub budget: Duration,
    pub handler: DeferredHandler,
    /// Invoked when the budget elapses before the handler finishes.
    pub on_expired: Arc<dyn Fn() + Send + Sync>,
}

/// Broker for deferred execution.
///
/// The host environment decides whether such a broker exists at all; when
/// it does not, background duties are simply unavailable.
pub trait DeferredScheduler: Send + Sync {
    fn submit(&self, request: DeferredRequest) -> Result<()>;
    fn cancel(&self, identifier: &str);
}

/// In-process scheduler backed by the runtime.
///
/// Honors the earliest delay with a plain sleep and enforces the budget
/// with a timeout. Suitable for hosts without an OS-level broker and for
/// tests.
pub struct TokioDeferredScheduler {
    pending: Mutex<HashMap<String, tokio::sync::mpsc::Sender<()>>>,
}

impl Default for TokioDeferredScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioDeferredScheduler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl DeferredScheduler for TokioDeferredScheduler {
    fn submit(&self, request: DeferredRequest) -> Result<()> {
        let (cancel_tx, mut cancel_rx) = tokio::sync::mpsc::channel::<()>(1);
        if let Some(previous) = self
            .pending
            .lock()
            .insert(request.identifier.clone(), cancel_tx)
        {
            let _ = previous.try_send(());
        }

        let DeferredRequest {
            identifier,
            earliest_delay,
            budget,
            handler,
            on_expired,
        } = request;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_rx.recv() => {
                    tracing::debug!(id = %identifier, "deferred request canceled");
                    return;
                }
                _ = tokio::time::sleep(earliest_delay) => {}
            }

            match tokio::time::timeout(budget, handler()).await {
                Ok(success) => {
                    tracing::debug!(id = %identifier, success, "deferred request finished");
                }
                Err(_) => {
                    tracing::warn!(
                        id = %identifier,
                        budget_ms = budget.as_millis() as u64,
                        "deferred request exceeded its budget"
                    );
                    on_expired();
                }
            }
        });

        Ok(())
    }

    fn cancel(&self, identifier: &str) {
        if let Some(cancel_tx) = self.pending.lock().remove(identifier) {
            let _ = cancel_tx.try_send(());
        }
    }
}

/// Chained deferred evaluation refresh.
pub struct BackgroundRefreshTask {
    core: Arc<RefreshTaskCore>,
}

struct RefreshTaskCore {
    scheduler: Arc<dyn DeferredScheduler>,
    evaluation: Arc<dyn EvaluationSync>,
    events: Arc<dyn EventPipeline>,
    user: Arc<UserHolder>,
    interval: Duration,
    budget: Duration,
}

impl BackgroundRefreshTask {
    pub fn new(
        scheduler: Arc<dyn DeferredScheduler>,
        evaluation: Arc<dyn EvaluationSync>,
        events: Arc<dyn EventPipeline>,
        user: Arc<UserHolder>,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            core: Arc::new(RefreshTaskCore {
                scheduler,
                evaluation,
                events,
                user,
                interval,
                budget,
            }),
        }
    }
}

impl ScheduledTask for BackgroundRefreshTask {
    fn start(&self) {
        if let Err(e) = self.core.scheduler.submit(RefreshTaskCore::request(&self.core)) {
            tracing::warn!("failed to schedule background refresh: {}", e);
        }
    }

    fn stop(&self) {
        self.core.scheduler.cancel(BACKGROUND_REFRESH_TASK_ID);
    }
}

impl RefreshTaskCore {
    fn request(core: &Arc<Self>) -> DeferredRequest {
        let handler_core = Arc::clone(core);
        let handler: DeferredHandler = Arc::new(move || {
            let core = Arc::clone(&handler_core);
            Box::pin(async move { core.run().await })
        });
        DeferredRequest {
            identifier: BACKGROUND_REFRESH_TASK_ID.to_string(),
            earliest_delay: core.interval,
            budget: core.budget,
            handler,
            on_expired: Arc::new(|| {
                tracing::warn!("background refresh abandoned at budget");
            }),
        }
    }

    async fn run(self: Arc<Self>) -> bool {
        // Chain before working: a crash mid-run must not end the cadence.
        if let Err(e) = self.scheduler.submit(Self::request(&self)) {
            tracing::warn!("failed to reschedule background refresh: {}", e);
        }

        let user = self.user.current_user();
        match self.evaluation.fetch(user, Some(self.budget)).await {
            Ok(summary) => {
                self.events.track_refresh_success(
                    summary.elapsed,
                    summary.size_bytes,
                    &summary.feature_tag,
                );
                true
            }
            Err(e) => {
                tracing::warn!("background refresh failed: {}", e);
                self.events.track_refresh_failure(e.code, "");
                false
            }
        }
    }
}

/// Chained deferred forced event flush.
pub struct BackgroundFlushTask {
    core: Arc<FlushTaskCore>,
}

struct FlushTaskCore {
    scheduler: Arc<dyn DeferredScheduler>,
    events: Arc<dyn EventPipeline>,
    interval: Duration,
    budget: Duration,
}

impl BackgroundFlushTask {
    pub fn new(
        scheduler: Arc<dyn DeferredScheduler>,
        events: Arc<dyn EventPipeline>,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            core: Arc::new(FlushTaskCore {
                scheduler,
                events,
                interval,
                budget,
            }),
        }
    }
}

impl ScheduledTask for BackgroundFlushTask {
    fn start(&self) {
        if let Err(e) = self.core.scheduler.submit(FlushTaskCore::request(&self.core)) {
            tracing::warn!("failed to schedule background flush: {}", e);
        }
    }

    fn stop(&self) {
        self.core.scheduler.cancel(BACKGROUND_FLUSH_TASK_ID);
    }
}

impl FlushTaskCore {
    fn request(core: &Arc<Self>) -> DeferredRequest {
        let handler_core = Arc::clone(core);
        let handler: DeferredHandler = Arc::new(move || {
            let core = Arc::clone(&handler_core);
            Box::pin(async move { core.run().await })
        });
        DeferredRequest {
            identifier: BACKGROUND_FLUSH_TASK_ID.to_string(),
            earliest_delay: core.interval,
            budget: core.budget,
            handler,
            on_expired: Arc::new(|| {
                tracing::warn!("background flush abandoned at budget");
            }),
        }
    }

    async fn run(self: Arc<Self>) -> bool {
        if let Err(e) = self.scheduler.submit(Self::request(&self)) {
            tracing::warn!("failed to reschedule background flush: {}", e);
        }

        match self.events.send_events(true).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("background flush failed: {}", e);
                false
            }
        }
    }
}
