//! Scheduled duties: the recurring timer, the two foreground tasks, and
//! their OS-brokered background counterparts.
//!
//! The lifecycle orchestrator only sees [`ScheduledTask`] values; which
//! concrete set is running depends on the app's foreground/background mode.

mod background;
mod evaluation_poller;
mod event_flusher;
mod timer;

pub use background::{
    BackgroundFlushTask, BackgroundRefreshTask, DeferredHandler, DeferredRequest,
    DeferredScheduler, TokioDeferredScheduler, BACKGROUND_FLUSH_TASK_ID,
    BACKGROUND_REFRESH_TASK_ID,
};
pub use evaluation_poller::{EvaluationPoller, PollerConfig};
pub use event_flusher::EventFlusher;

/// A startable/stoppable recurring duty.
///
/// `start` and `stop` are synchronous and idempotent; `stop` is safe to
/// call from any state, including before `start` was ever called, and
/// leaves no timer armed and no listener registered.
pub trait ScheduledTask: Send + Sync {
    fn start(&self);
    fn stop(&self);
}
