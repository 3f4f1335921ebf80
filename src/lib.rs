//! # FlagSync
//!
//! On-device synchronization core for feature flag evaluations.
//!
//! The client keeps a durable local cache of server-computed evaluations
//! fresh via adaptive polling, delivers analytics events with at-least-once
//! semantics, and switches between foreground and background execution
//! regimes on host lifecycle transitions.
//!
//! ## Quick start
//!
//! ```no_run
//! use flagsync::{FlagSync, FlagSyncOptions, UserContext};
//!
//! # async fn run() -> flagsync::Result<()> {
//! let options = FlagSyncOptions::builder("api-key", "https://api.example.dev/v1")
//!     .feature_tag("mobile")
//!     .storage_path("/data/flagsync.db")
//!     .build();
//!
//! FlagSync::initialize(options, UserContext::new("user-42"))?;
//!
//! let client = FlagSync::instance()?;
//! client.start();
//! if let Some(evaluation) = client.evaluation("dark-mode") {
//!     println!("dark-mode = {}", evaluation.value);
//! }
//! # Ok(())
//! # }
//! ```

mod api;
mod client;
mod config;
mod error;
mod lifecycle;
mod store;
mod sync;
mod task;
mod user;

pub use client::FlagSyncClient;
pub use config::{FlagSyncOptions, FlagSyncOptionsBuilder};
pub use error::{ErrorCode, FlagSyncError, Result};
pub use lifecycle::AppLifecycle;
pub use store::{EvaluationRecord, EventRecord, EventType};
pub use sync::{BoxFuture, RefreshSummary};
pub use task::{
    DeferredHandler, DeferredRequest, DeferredScheduler, TokioDeferredScheduler,
    BACKGROUND_FLUSH_TASK_ID, BACKGROUND_REFRESH_TASK_ID,
};
pub use user::UserContext;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::Arc;

static INSTANCE: Lazy<RwLock<Option<Arc<FlagSyncClient>>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide client slot.
///
/// Hosts that want exactly one client per process initialize it here once
/// and reach it from anywhere; embedding [`FlagSyncClient`] directly works
/// just as well.
pub struct FlagSync;

impl FlagSync {
    /// Creates the process-wide client. Fails if one already exists.
    pub fn initialize(options: FlagSyncOptions, user: UserContext) -> Result<()> {
        let mut slot = INSTANCE.write();
        if slot.is_some() {
            return Err(FlagSyncError::already_initialized());
        }
        *slot = Some(Arc::new(FlagSyncClient::new(options, user)?));
        Ok(())
    }

    /// The process-wide client, if initialized.
    pub fn instance() -> Result<Arc<FlagSyncClient>> {
        INSTANCE
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(FlagSyncError::not_initialized)
    }

    pub fn is_initialized() -> bool {
        INSTANCE.read().is_some()
    }

    /// Stops and releases the process-wide client. Safe when none exists.
    pub fn shutdown() {
        if let Some(client) = INSTANCE.write().take() {
            client.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests share the process-wide slot, so they run as one body.
    #[tokio::test]
    async fn test_global_slot_lifecycle() {
        assert!(!FlagSync::is_initialized());
        assert_eq!(
            FlagSync::instance().unwrap_err().code,
            ErrorCode::SdkNotInitialized
        );

        let options = FlagSyncOptions::builder("key", "https://api.example.dev")
            .background_enabled(false)
            .build();
        FlagSync::initialize(options.clone(), UserContext::new("u1")).unwrap();
        assert!(FlagSync::is_initialized());
        assert!(FlagSync::instance().is_ok());

        let err = FlagSync::initialize(options, UserContext::new("u2")).unwrap_err();
        assert_eq!(err.code, ErrorCode::SdkAlreadyInitialized);

        FlagSync::shutdown();
        assert!(!FlagSync::is_initialized());

        // Shutdown with no instance is a no-op.
        FlagSync::shutdown();
    }
}
