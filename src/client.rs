//! The synchronization client: wiring, public surface, lifecycle entry.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::config::FlagSyncOptions;
use crate::error::Result;
use crate::lifecycle::{AppLifecycle, LifecycleOrchestrator};
use crate::store::{Database, EvaluationRecord, EvaluationStore, EventRecord, EventStore, EventType};
use crate::sync::{
    EvaluationInteractor, EvaluationSync, EventInteractor, EventPipeline, RefreshSummary,
};
use crate::task::{
    BackgroundFlushTask, BackgroundRefreshTask, DeferredScheduler, EvaluationPoller, EventFlusher,
    PollerConfig, ScheduledTask, TokioDeferredScheduler,
};
use crate::user::{UserContext, UserHolder};
use std::collections::HashMap;

/// On-device feature flag synchronization client.
///
/// Owns the durable stores, the network gateways, and the scheduled tasks;
/// the host only feeds it lifecycle transitions and reads evaluations.
pub struct FlagSyncClient {
    user_holder: Arc<UserHolder>,
    evaluation_store: Arc<EvaluationStore>,
    evaluation: Arc<dyn EvaluationSync>,
    events: Arc<dyn EventPipeline>,
    orchestrator: LifecycleOrchestrator,
}

impl FlagSyncClient {
    /// Builds a client with the in-process deferred scheduler when
    /// background duties are enabled.
    pub fn new(options: FlagSyncOptions, user: UserContext) -> Result<Self> {
        let scheduler: Option<Arc<dyn DeferredScheduler>> = if options.background_enabled {
            Some(Arc::new(TokioDeferredScheduler::new()))
        } else {
            None
        };
        Self::with_scheduler(options, user, scheduler)
    }

    /// Builds a client around a host-provided deferred execution broker.
    /// `None` means the host has no such capability; background duties are
    /// then skipped entirely and only foreground tasks ever run.
    pub fn with_scheduler(
        options: FlagSyncOptions,
        user: UserContext,
        scheduler: Option<Arc<dyn DeferredScheduler>>,
    ) -> Result<Self> {
        options.validate()?;

        let database = Arc::new(match options.storage_path {
            Some(ref path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        });

        let user_holder = Arc::new(UserHolder::new(user));
        let evaluation_store = Arc::new(EvaluationStore::new(Arc::clone(&database)));
        evaluation_store.load(&user_holder.user_id())?;
        let event_store = Arc::new(EventStore::new(database));

        let api = Arc::new(ApiClient::new(&options)?);

        let evaluation: Arc<dyn EvaluationSync> = Arc::new(EvaluationInteractor::new(
            api.clone(),
            Arc::clone(&evaluation_store),
            Arc::clone(&user_holder),
            options.feature_tag.clone(),
        ));
        let events: Arc<dyn EventPipeline> = Arc::new(EventInteractor::new(
            event_store,
            api,
            options.event_batch_size,
            options.max_event_queue_size,
        ));

        let poller = EvaluationPoller::new(
            PollerConfig {
                poll_interval: options.poll_interval,
                retry_poll_interval: options.retry_poll_interval,
                max_retry_count: options.max_retry_count,
                feature_tag: options.feature_tag.clone(),
            },
            Arc::clone(&evaluation),
            Arc::clone(&events),
            Arc::clone(&user_holder),
        );
        let flusher = EventFlusher::new(Arc::clone(&events), options.event_flush_interval);
        let foreground: Vec<Arc<dyn ScheduledTask>> = vec![Arc::new(poller), Arc::new(flusher)];

        let background: Vec<Arc<dyn ScheduledTask>> = match scheduler {
            Some(scheduler) if options.background_enabled => vec![
                Arc::new(BackgroundRefreshTask::new(
                    Arc::clone(&scheduler),
                    Arc::clone(&evaluation),
                    Arc::clone(&events),
                    Arc::clone(&user_holder),
                    options.background_refresh_interval,
                    options.background_budget,
                )),
                Arc::new(BackgroundFlushTask::new(
                    scheduler,
                    Arc::clone(&events),
                    options.background_flush_interval,
                    options.background_budget,
                )),
            ],
            _ => Vec::new(),
        };

        let orchestrator =
            LifecycleOrchestrator::new(foreground, background, Arc::clone(&events));

        Ok(Self {
            user_holder,
            evaluation_store,
            evaluation,
            events,
            orchestrator,
        })
    }

    /// Begins foreground synchronization.
    pub fn start(&self) {
        self.orchestrator.on_signal(AppLifecycle::EnteredForeground);
    }

    /// Stops every scheduled duty. Idempotent, safe from any state.
    pub fn stop(&self) {
        self.orchestrator.stop();
    }

    /// Forwards a host lifecycle transition.
    pub fn on_lifecycle(&self, signal: AppLifecycle) {
        self.orchestrator.on_signal(signal);
    }

    /// The cached evaluation for a feature, if one has been synced.
    pub fn evaluation(&self, feature_id: &str) -> Option<EvaluationRecord> {
        self.evaluation_store.get(feature_id)
    }

    /// All cached evaluations for the current user.
    pub fn evaluations(&self) -> Vec<EvaluationRecord> {
        self.evaluation_store.all()
    }

    /// Queues a custom analytics event for at-least-once delivery.
    pub fn track(&self, payload: serde_json::Value) {
        self.events.enqueue(EventRecord::new(EventType::Custom, payload));
    }

    /// Forces delivery of everything queued right now.
    pub async fn flush(&self) -> Result<bool> {
        self.events.send_events(true).await
    }

    /// One refresh outside the polling schedule. Does not disturb the
    /// poller's cadence or retry state.
    pub async fn refresh_now(&self) -> Result<RefreshSummary> {
        self.evaluation
            .fetch(self.user_holder.current_user(), None)
            .await
    }

    pub fn current_user(&self) -> UserContext {
        self.user_holder.current_user()
    }

    /// Switches the active user and reloads their cached evaluations. The
    /// next refresh re-evaluates against the new identity.
    pub fn set_user(&self, user: UserContext) -> Result<()> {
        self.user_holder.set_user(user);
        self.evaluation_store.load(&self.user_holder.user_id())
    }

    /// Replaces the user's attributes; the next refresh tells the server to
    /// re-evaluate everything against them.
    pub fn update_user_attributes<F>(&self, f: F)
    where
        F: FnOnce(HashMap<String, String>) -> HashMap<String, String>,
    {
        self.user_holder.update_attributes(f);
    }

    /// Number of events currently queued for delivery.
    pub fn queued_events(&self) -> usize {
        self.events.queued()
    }
}

impl std::fmt::Debug for FlagSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagSyncClient")
            .field("user_id", &self.user_holder.user_id())
            .field("queued_events", &self.events.queued())
            .finish_non_exhaustive()
    }
}

impl Drop for FlagSyncClient {
    fn drop(&mut self) {
        self.orchestrator.stop();
    }
}
