//! Cancelable, restartable periodic callback source.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Callback invoked on each timer fire.
pub type TimerCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct ArmedTimer {
    shutdown_tx: mpsc::Sender<()>,
    interval: Duration,
}

/// A repeating timer bound to the runtime's task context.
///
/// Invariants:
/// - at most one timer is armed per instance: `start` while armed disarms
///   the previous one first (logged, never silently leaked);
/// - the first fire happens after one full interval, never immediately;
/// - fires are serialized: the loop awaits the callback before sleeping
///   again, so a new fire never begins while the previous one is in flight.
pub struct RecurringTimer {
    armed: Mutex<Option<ArmedTimer>>,
}

impl Default for RecurringTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecurringTimer {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(None),
        }
    }

    /// Arms the timer. Re-arming replaces the previous schedule; the new
    /// first fire is one full `interval` from now.
    pub fn start(&self, interval: Duration, on_fire: TimerCallback) {
        let mut armed = self.armed.lock();
        if let Some(previous) = armed.take() {
            tracing::debug!(
                previous_interval_ms = previous.interval.as_millis() as u64,
                "timer restarted while armed, disarming previous"
            );
            let _ = previous.shutdown_tx.try_send(());
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        on_fire().await;
                    }
                }
            }
        });

        *armed = Some(ArmedTimer {
            shutdown_tx,
            interval,
        });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "timer armed");
    }

    /// Disarms the timer. Idempotent; a no-op when nothing is armed.
    pub fn stop(&self) {
        if let Some(armed) = self.armed.lock().take() {
            let _ = armed.shutdown_tx.try_send(());
            tracing::debug!("timer disarmed");
        }
    }

    /// Whether a timer is currently armed.
    pub fn is_active(&self) -> bool {
        self.armed.lock().is_some()
    }

    /// The interval of the armed timer, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.armed.lock().as_ref().map(|armed| armed.interval)
    }
}

impl Drop for RecurringTimer {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.get_mut().take() {
            let _ = armed.shutdown_tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_callback() -> (Arc<AtomicU32>, TimerCallback) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        let callback: TimerCallback = Arc::new(move || {
            let count = Arc::clone(&count_clone);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });
        (count, callback)
    }

    #[tokio::test]
    async fn test_no_fire_before_first_interval() {
        let timer = RecurringTimer::new();
        let (count, callback) = counting_callback();

        timer.start(Duration::from_millis(100), callback);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        timer.stop();
    }

    #[tokio::test]
    async fn test_fires_repeatedly() {
        let timer = RecurringTimer::new();
        let (count, callback) = counting_callback();

        timer.start(Duration::from_millis(20), callback);
        tokio::time::sleep(Duration::from_millis(130)).await;
        timer.stop();

        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected at least 3 fires, got {}", fired);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_safe_before_start() {
        let timer = RecurringTimer::new();
        timer.stop();
        timer.stop();
        assert!(!timer.is_active());

        let (_, callback) = counting_callback();
        timer.start(Duration::from_millis(50), callback);
        assert!(timer.is_active());

        timer.stop();
        timer.stop();
        assert!(!timer.is_active());
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_schedule() {
        let timer = RecurringTimer::new();
        let (first_count, first) = counting_callback();
        let (second_count, second) = counting_callback();

        timer.start(Duration::from_millis(20), first);
        timer.start(Duration::from_millis(20), second);
        assert!(timer.is_active());
        assert_eq!(timer.interval(), Some(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(70)).await;
        timer.stop();

        // Only the replacement callback keeps firing.
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert!(second_count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_no_fires_after_stop() {
        let timer = RecurringTimer::new();
        let (count, callback) = counting_callback();

        timer.start(Duration::from_millis(20), callback);
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.stop();

        let at_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
    }

    #[tokio::test]
    async fn test_fires_are_serialized() {
        let timer = RecurringTimer::new();
        let in_flight = Arc::new(AtomicU32::new(0));
        let overlaps = Arc::new(AtomicU32::new(0));

        let in_flight_clone = Arc::clone(&in_flight);
        let overlaps_clone = Arc::clone(&overlaps);
        let callback: TimerCallback = Arc::new(move || {
            let in_flight = Arc::clone(&in_flight_clone);
            let overlaps = Arc::clone(&overlaps_clone);
            Box::pin(async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                // Callback runs longer than the interval.
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            })
        });

        timer.start(Duration::from_millis(10), callback);
        tokio::time::sleep(Duration::from_millis(150)).await;
        timer.stop();

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
