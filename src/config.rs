use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ErrorCode, FlagSyncError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRY_COUNT: u32 = 5;
pub const DEFAULT_EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_EVENT_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_BACKGROUND_REFRESH_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_BACKGROUND_FLUSH_INTERVAL: Duration = Duration::from_secs(600);
pub const DEFAULT_BACKGROUND_BUDGET: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for the synchronization core.
///
/// `poll_interval` and `retry_poll_interval` together drive the foreground
/// refresh cadence: on consecutive failures the poller temporarily switches
/// to `retry_poll_interval`, bounded by `max_retry_count`, and never retries
/// faster than the configured normal cadence already provides.
#[derive(Debug, Clone)]
pub struct FlagSyncOptions {
    pub api_key: String,
    pub api_endpoint: String,
    /// Feature tag scoping which flags this client receives. Empty = all.
    pub feature_tag: String,
    pub poll_interval: Duration,
    pub retry_poll_interval: Duration,
    pub max_retry_count: u32,
    pub event_flush_interval: Duration,
    /// Batching threshold for non-forced flushes.
    pub event_batch_size: usize,
    pub max_event_queue_size: usize,
    pub background_refresh_interval: Duration,
    pub background_flush_interval: Duration,
    /// Execution budget granted to one background invocation.
    pub background_budget: Duration,
    pub request_timeout: Duration,
    /// Whether OS-brokered background tasks should be registered at all.
    pub background_enabled: bool,
    /// Database path. `None` keeps the store in memory.
    pub storage_path: Option<PathBuf>,
}

impl FlagSyncOptions {
    pub fn new(api_key: impl Into<String>, api_endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_endpoint: api_endpoint.into(),
            feature_tag: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_poll_interval: DEFAULT_RETRY_POLL_INTERVAL,
            max_retry_count: DEFAULT_MAX_RETRY_COUNT,
            event_flush_interval: DEFAULT_EVENT_FLUSH_INTERVAL,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            max_event_queue_size: DEFAULT_MAX_EVENT_QUEUE_SIZE,
            background_refresh_interval: DEFAULT_BACKGROUND_REFRESH_INTERVAL,
            background_flush_interval: DEFAULT_BACKGROUND_FLUSH_INTERVAL,
            background_budget: DEFAULT_BACKGROUND_BUDGET,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            background_enabled: true,
            storage_path: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigMissingRequired,
                "API key is required",
            ));
        }

        if self.api_endpoint.is_empty() {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigMissingRequired,
                "API endpoint is required",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Polling interval must be positive",
            ));
        }

        if self.retry_poll_interval.is_zero() {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Retry polling interval must be positive",
            ));
        }

        if self.event_flush_interval.is_zero() {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Event flush interval must be positive",
            ));
        }

        if self.event_batch_size == 0 {
            return Err(FlagSyncError::config_error(
                ErrorCode::ConfigInvalidInterval,
                "Event batch size must be positive",
            ));
        }

        Ok(())
    }

    pub fn builder(
        api_key: impl Into<String>,
        api_endpoint: impl Into<String>,
    ) -> FlagSyncOptionsBuilder {
        FlagSyncOptionsBuilder::new(api_key, api_endpoint)
    }
}

pub struct FlagSyncOptionsBuilder {
    options: FlagSyncOptions,
}

impl FlagSyncOptionsBuilder {
    pub fn new(api_key: impl Into<String>, api_endpoint: impl Into<String>) -> Self {
        Self {
            options: FlagSyncOptions::new(api_key, api_endpoint),
        }
    }

    pub fn feature_tag(mut self, tag: impl Into<String>) -> Self {
        self.options.feature_tag = tag.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    pub fn retry_poll_interval(mut self, interval: Duration) -> Self {
        self.options.retry_poll_interval = interval;
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.options.max_retry_count = count;
        self
    }

    pub fn event_flush_interval(mut self, interval: Duration) -> Self {
        self.options.event_flush_interval = interval;
        self
    }

    pub fn event_batch_size(mut self, size: usize) -> Self {
        self.options.event_batch_size = size;
        self
    }

    pub fn max_event_queue_size(mut self, size: usize) -> Self {
        self.options.max_event_queue_size = size;
        self
    }

    pub fn background_refresh_interval(mut self, interval: Duration) -> Self {
        self.options.background_refresh_interval = interval;
        self
    }

    pub fn background_flush_interval(mut self, interval: Duration) -> Self {
        self.options.background_flush_interval = interval;
        self
    }

    pub fn background_budget(mut self, budget: Duration) -> Self {
        self.options.background_budget = budget;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn background_enabled(mut self, enabled: bool) -> Self {
        self.options.background_enabled = enabled;
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.storage_path = Some(path.into());
        self
    }

    pub fn build(self) -> FlagSyncOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FlagSyncOptions::new("key", "https://api.example.dev");
        assert_eq!(options.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(options.retry_poll_interval, DEFAULT_RETRY_POLL_INTERVAL);
        assert_eq!(options.max_retry_count, DEFAULT_MAX_RETRY_COUNT);
        assert_eq!(options.event_batch_size, DEFAULT_EVENT_BATCH_SIZE);
        assert!(options.background_enabled);
        assert!(options.storage_path.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = FlagSyncOptions::builder("key", "https://api.example.dev")
            .feature_tag("mobile")
            .poll_interval(Duration::from_secs(120))
            .retry_poll_interval(Duration::from_secs(5))
            .max_retry_count(3)
            .event_flush_interval(Duration::from_secs(15))
            .event_batch_size(10)
            .background_enabled(false)
            .storage_path("/tmp/flagsync.db")
            .build();

        assert_eq!(options.feature_tag, "mobile");
        assert_eq!(options.poll_interval, Duration::from_secs(120));
        assert_eq!(options.retry_poll_interval, Duration::from_secs(5));
        assert_eq!(options.max_retry_count, 3);
        assert_eq!(options.event_batch_size, 10);
        assert!(!options.background_enabled);
        assert!(options.storage_path.is_some());
    }

    #[test]
    fn test_validate_missing_api_key() {
        let options = FlagSyncOptions::new("", "https://api.example.dev");
        let err = options.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissingRequired);
    }

    #[test]
    fn test_validate_zero_intervals() {
        let options = FlagSyncOptions::builder("key", "https://api.example.dev")
            .poll_interval(Duration::ZERO)
            .build();
        let err = options.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidInterval);

        let options = FlagSyncOptions::builder("key", "https://api.example.dev")
            .event_batch_size(0)
            .build();
        assert!(options.validate().is_err());
    }
}
