//! Error types for the synchronization core.
//!
//! All refresh/flush failures are caught at the task boundary and converted
//! to telemetry; the only errors that propagate to the caller are
//! configuration and store-initialization failures.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Network errors (transient, drive the retry cadence)
    NetworkError,
    NetworkTimeout,

    // Server errors
    ServerError,

    // Store errors
    StoreOpenError,
    StoreMigrationFailed,
    StoreReadError,
    StoreWriteError,

    // Scheduling errors
    BackgroundSubmitFailed,

    // Configuration errors
    ConfigMissingRequired,
    ConfigInvalidInterval,

    // SDK lifecycle errors
    SdkNotInitialized,
    SdkAlreadyInitialized,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::StoreOpenError => "STORE_OPEN_ERROR",
            ErrorCode::StoreMigrationFailed => "STORE_MIGRATION_FAILED",
            ErrorCode::StoreReadError => "STORE_READ_ERROR",
            ErrorCode::StoreWriteError => "STORE_WRITE_ERROR",
            ErrorCode::BackgroundSubmitFailed => "BACKGROUND_SUBMIT_FAILED",
            ErrorCode::ConfigMissingRequired => "CONFIG_MISSING_REQUIRED",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::SdkNotInitialized => "SDK_NOT_INITIALIZED",
            ErrorCode::SdkAlreadyInitialized => "SDK_ALREADY_INITIALIZED",
        }
    }

    /// Whether a failure with this code is expected to clear on its own,
    /// i.e. is worth retrying on the next scheduled attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::ServerError
                | ErrorCode::BackgroundSubmitFailed
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct FlagSyncError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FlagSyncError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(
            ErrorCode::SdkNotInitialized,
            "SDK not initialized. Call FlagSync::initialize() first.",
        )
    }

    pub fn already_initialized() -> Self {
        Self::new(ErrorCode::SdkAlreadyInitialized, "SDK already initialized.")
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    pub fn is_store_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::StoreOpenError
                | ErrorCode::StoreMigrationFailed
                | ErrorCode::StoreReadError
                | ErrorCode::StoreWriteError
        )
    }
}

pub type Result<T> = std::result::Result<T, FlagSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_code() {
        let err = FlagSyncError::new(ErrorCode::NetworkError, "connection refused");
        assert_eq!(err.to_string(), "[NETWORK_ERROR] connection refused");
    }

    #[test]
    fn test_recoverable_codes() {
        assert!(ErrorCode::NetworkError.is_recoverable());
        assert!(ErrorCode::ServerError.is_recoverable());
        assert!(!ErrorCode::StoreMigrationFailed.is_recoverable());
        assert!(!ErrorCode::ConfigInvalidInterval.is_recoverable());
    }

    #[test]
    fn test_store_error_classification() {
        assert!(FlagSyncError::new(ErrorCode::StoreMigrationFailed, "x").is_store_error());
        assert!(!FlagSyncError::new(ErrorCode::NetworkError, "x").is_store_error());
    }

    #[test]
    fn test_with_source_preserves_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = FlagSyncError::with_source(ErrorCode::StoreWriteError, "write failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
