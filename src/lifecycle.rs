//! Foreground/background task switching.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::sync::EventPipeline;
use crate::task::ScheduledTask;

/// App lifecycle transitions the host forwards to the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    EnteredForeground,
    WillEnterForeground,
    EnteredBackground,
}

/// Runs exactly one of two task sets at a time.
///
/// On a background transition, queued events are flushed before the
/// background set starts, so nothing waits on the slow background cadence
/// that could have gone out immediately.
pub struct LifecycleOrchestrator {
    foreground: Vec<Arc<dyn ScheduledTask>>,
    background: Vec<Arc<dyn ScheduledTask>>,
    events: Arc<dyn EventPipeline>,
    /// Bumped on every transition and on `stop()`. The backgrounding
    /// continuation runs asynchronously (it awaits the forced flush) and
    /// must not start tasks once a later transition has superseded it.
    generation: Arc<Mutex<u64>>,
}

impl LifecycleOrchestrator {
    pub fn new(
        foreground: Vec<Arc<dyn ScheduledTask>>,
        background: Vec<Arc<dyn ScheduledTask>>,
        events: Arc<dyn EventPipeline>,
    ) -> Self {
        Self {
            foreground,
            background,
            events,
            generation: Arc::new(Mutex::new(0)),
        }
    }

    fn bump_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    pub fn on_signal(&self, signal: AppLifecycle) {
        let generation = self.bump_generation();
        match signal {
            AppLifecycle::EnteredForeground | AppLifecycle::WillEnterForeground => {
                tracing::debug!("lifecycle: entering foreground");
                for task in &self.background {
                    task.stop();
                }
                for task in &self.foreground {
                    task.start();
                }
            }
            AppLifecycle::EnteredBackground => {
                tracing::debug!("lifecycle: entering background");
                for task in &self.foreground {
                    task.stop();
                }

                let events = Arc::clone(&self.events);
                let background: Vec<_> = self.background.iter().map(Arc::clone).collect();
                let current = Arc::clone(&self.generation);
                tokio::spawn(async move {
                    // Drain the queue while the process is still warm.
                    if let Err(e) = events.send_events(true).await {
                        tracing::warn!("flush on backgrounding failed: {}", e);
                    }
                    // The lock is held across the start loop so a concurrent
                    // stop() either lands before it (skip) or after it (the
                    // freshly started tasks get stopped).
                    let guard = current.lock();
                    if *guard != generation {
                        tracing::debug!("lifecycle: transition superseded, background set not started");
                        return;
                    }
                    for task in &background {
                        task.start();
                    }
                });
            }
        }
    }

    /// Stops both sets and invalidates any in-flight transition. Idempotent.
    pub fn stop(&self) {
        self.bump_generation();
        for task in self.foreground.iter().chain(self.background.iter()) {
            task.stop();
        }
    }
}
