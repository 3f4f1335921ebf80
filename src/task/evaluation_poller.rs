//! Foreground evaluation refresh task.
//!
//! Polls for evaluations at the configured interval and owns the
//! retry/backoff state machine: after a failure the cadence temporarily
//! drops to the retry interval, bounded by a maximum consecutive retry
//! count, then falls back to the normal cadence. The task never retries
//! faster than the configured cadence already provides.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::sync::{EvaluationSync, EventPipeline};
use crate::task::timer::{RecurringTimer, TimerCallback};
use crate::task::ScheduledTask;
use crate::user::UserHolder;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub retry_poll_interval: Duration,
    pub max_retry_count: u32,
    pub feature_tag: String,
}

/// Refresh task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    /// Polling at the normal interval.
    Scheduled,
    /// Polling at the retry interval after `n` consecutive failures.
    Retrying(u32),
}

pub struct EvaluationPoller {
    core: Arc<PollerCore>,
}

struct PollerCore {
    config: PollerConfig,
    evaluation: Arc<dyn EvaluationSync>,
    events: Arc<dyn EventPipeline>,
    user: Arc<UserHolder>,
    timer: RecurringTimer,
    state: Mutex<PollerState>,
}

impl EvaluationPoller {
    pub fn new(
        config: PollerConfig,
        evaluation: Arc<dyn EvaluationSync>,
        events: Arc<dyn EventPipeline>,
        user: Arc<UserHolder>,
    ) -> Self {
        Self {
            core: Arc::new(PollerCore {
                config,
                evaluation,
                events,
                user,
                timer: RecurringTimer::new(),
                state: Mutex::new(PollerState::Idle),
            }),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.core.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.core.timer.is_active()
    }
}

impl ScheduledTask for EvaluationPoller {
    fn start(&self) {
        *self.core.state.lock() = PollerState::Scheduled;
        self.core
            .timer
            .start(self.core.config.poll_interval, PollerCore::callback(&self.core));
        tracing::debug!(
            interval_ms = self.core.config.poll_interval.as_millis() as u64,
            "evaluation poller started"
        );
    }

    fn stop(&self) {
        self.core.timer.stop();
        *self.core.state.lock() = PollerState::Idle;
        tracing::debug!("evaluation poller stopped");
    }
}

impl PollerCore {
    fn callback(core: &Arc<PollerCore>) -> TimerCallback {
        let core = Arc::clone(core);
        Arc::new(move || {
            let core = Arc::clone(&core);
            Box::pin(async move {
                core.tick().await;
            })
        })
    }

    async fn tick(self: Arc<Self>) {
        let user = self.user.current_user();
        // Collaborator default timeout.
        let result = self.evaluation.fetch(user, None).await;

        match result {
            Ok(summary) => {
                self.events.track_refresh_success(
                    summary.elapsed,
                    summary.size_bytes,
                    &summary.feature_tag,
                );
                self.on_success();
            }
            Err(err) => {
                tracing::warn!("refresh failed: {}", err);
                self.events
                    .track_refresh_failure(err.code, &self.config.feature_tag);
                self.on_failure();
            }
        }
    }

    fn on_success(self: &Arc<Self>) {
        let mut state = self.state.lock();
        match *state {
            PollerState::Retrying(_) => {
                *state = PollerState::Scheduled;
                drop(state);
                // Back to the normal cadence.
                self.timer
                    .start(self.config.poll_interval, Self::callback(self));
            }
            PollerState::Scheduled | PollerState::Idle => {}
        }
    }

    fn on_failure(self: &Arc<Self>) {
        // The normal cadence is already at least as aggressive as retry
        // would be; leave the schedule alone.
        if self.config.poll_interval <= self.config.retry_poll_interval {
            return;
        }

        let mut state = self.state.lock();
        match *state {
            PollerState::Scheduled => {
                *state = PollerState::Retrying(1);
                drop(state);
                tracing::debug!(
                    retry_interval_ms = self.config.retry_poll_interval.as_millis() as u64,
                    "switching to retry cadence"
                );
                self.timer
                    .start(self.config.retry_poll_interval, Self::callback(self));
            }
            PollerState::Retrying(count) => {
                let next = count + 1;
                if next > self.config.max_retry_count {
                    // Give up retrying, fall back to the normal cadence.
                    *state = PollerState::Scheduled;
                    drop(state);
                    tracing::debug!("retry budget exhausted, resuming normal cadence");
                    self.timer
                        .start(self.config.poll_interval, Self::callback(self));
                } else {
                    // Already on the faster cadence; no re-arm.
                    *state = PollerState::Retrying(next);
                }
            }
            PollerState::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, FlagSyncError, Result};
    use crate::store::EventRecord;
    use crate::sync::{BoxFuture, NewEventsListener, RefreshSummary};
    use crate::user::UserContext;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Sync collaborator whose outcome is toggled per test.
    struct ToggleSync {
        ok: AtomicBool,
        calls: AtomicUsize,
    }

    impl ToggleSync {
        fn new(ok: bool) -> Self {
            Self {
                ok: AtomicBool::new(ok),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EvaluationSync for ToggleSync {
        fn fetch(
            &self,
            _user: UserContext,
            _timeout: Option<Duration>,
        ) -> BoxFuture<Result<RefreshSummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let ok = self.ok.load(Ordering::SeqCst);
            Box::pin(async move {
                if ok {
                    Ok(RefreshSummary {
                        elapsed: Duration::from_millis(1),
                        size_bytes: 10,
                        feature_tag: String::new(),
                        updated: true,
                    })
                } else {
                    Err(FlagSyncError::new(ErrorCode::NetworkError, "down"))
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingPipeline {
        successes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl EventPipeline for RecordingPipeline {
        fn enqueue(&self, _event: EventRecord) {}
        fn send_events(&self, _force: bool) -> BoxFuture<Result<bool>> {
            Box::pin(async { Ok(false) })
        }
        fn set_listener(&self, _listener: Option<NewEventsListener>) {}
        fn queued(&self) -> usize {
            0
        }
        fn track_refresh_success(&self, _elapsed: Duration, _size: u64, _tag: &str) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
        fn track_refresh_failure(&self, _code: ErrorCode, _tag: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poller(
        config: PollerConfig,
        ok: bool,
    ) -> (Arc<ToggleSync>, Arc<RecordingPipeline>, EvaluationPoller) {
        let sync = Arc::new(ToggleSync::new(ok));
        let pipeline = Arc::new(RecordingPipeline::default());
        let poller = EvaluationPoller::new(
            config,
            sync.clone(),
            pipeline.clone(),
            Arc::new(UserHolder::new(UserContext::new("u1"))),
        );
        (sync, pipeline, poller)
    }

    fn config(poll_ms: u64, retry_ms: u64, max_retries: u32) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(poll_ms),
            retry_poll_interval: Duration::from_millis(retry_ms),
            max_retry_count: max_retries,
            feature_tag: String::new(),
        }
    }

    async fn tick(poller: &EvaluationPoller) {
        Arc::clone(&poller.core).tick().await;
    }

    #[tokio::test]
    async fn test_success_keeps_normal_schedule() {
        let (_, pipeline, poller) = poller(config(60_000, 5_000, 3), true);
        poller.start();

        tick(&poller).await;

        assert_eq!(poller.state(), PollerState::Scheduled);
        assert_eq!(poller.core.timer.interval(), Some(Duration::from_secs(60)));
        assert_eq!(pipeline.successes.load(Ordering::SeqCst), 1);
        poller.stop();
    }

    #[tokio::test]
    async fn test_retry_state_machine_walks_the_bound() {
        // normalInterval=60000, retryInterval=5000, maxRetryCount=3.
        let (_, pipeline, poller) = poller(config(60_000, 5_000, 3), false);
        poller.start();

        // Three consecutive failures: Retrying(1) -> Retrying(2) -> Retrying(3),
        // all polling at the retry interval.
        for expected in 1..=3 {
            tick(&poller).await;
            assert_eq!(poller.state(), PollerState::Retrying(expected));
            assert_eq!(
                poller.core.timer.interval(),
                Some(Duration::from_millis(5_000))
            );
        }

        // The 4th failure exhausts the budget and resets to the normal cadence.
        tick(&poller).await;
        assert_eq!(poller.state(), PollerState::Scheduled);
        assert_eq!(
            poller.core.timer.interval(),
            Some(Duration::from_millis(60_000))
        );
        assert_eq!(pipeline.failures.load(Ordering::SeqCst), 4);
        poller.stop();
    }

    #[tokio::test]
    async fn test_success_resets_retry_count() {
        let (sync, _, poller) = poller(config(60_000, 5_000, 3), false);
        poller.start();

        tick(&poller).await;
        tick(&poller).await;
        assert_eq!(poller.state(), PollerState::Retrying(2));

        sync.ok.store(true, Ordering::SeqCst);
        tick(&poller).await;
        assert_eq!(poller.state(), PollerState::Scheduled);
        assert_eq!(
            poller.core.timer.interval(),
            Some(Duration::from_millis(60_000))
        );

        // A later failure starts a fresh retry run from 1.
        sync.ok.store(false, Ordering::SeqCst);
        tick(&poller).await;
        assert_eq!(poller.state(), PollerState::Retrying(1));
        poller.stop();
    }

    #[tokio::test]
    async fn test_no_retry_when_already_fast() {
        // normalInterval <= retryInterval: a failure never changes the schedule.
        let (_, pipeline, poller) = poller(config(5_000, 60_000, 3), false);
        poller.start();

        tick(&poller).await;

        assert_eq!(poller.state(), PollerState::Scheduled);
        assert_eq!(
            poller.core.timer.interval(),
            Some(Duration::from_millis(5_000))
        );
        assert_eq!(pipeline.failures.load(Ordering::SeqCst), 1);
        poller.stop();
    }

    #[tokio::test]
    async fn test_stop_returns_to_idle_from_any_state() {
        let (_, _, poller) = poller(config(60_000, 5_000, 3), false);

        // Before start.
        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(!poller.is_active());

        poller.start();
        tick(&poller).await;
        assert_eq!(poller.state(), PollerState::Retrying(1));

        poller.stop();
        poller.stop();
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(!poller.is_active());
    }

    #[tokio::test]
    async fn test_timer_drives_fetches() {
        let (sync, _, poller) = poller(config(20, 10, 3), true);
        poller.start();

        tokio::time::sleep(Duration::from_millis(130)).await;
        poller.stop();

        let calls = sync.calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "expected at least 3 fetches, got {}", calls);
    }
}
