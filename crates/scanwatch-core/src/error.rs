//! Unified error types for the scanwatch core library.
//!
//! [`MonitorError`] covers every failure mode of a monitoring run. Errors fall
//! into four families that decide how the run reacts:
//!
//! - **Configuration**: invalid run options; fatal before the adapter is touched
//! - **Adapter call**: a scan start/stop failed; logged and recovered locally
//! - **Classification tap**: the warning tap faulted; reported, message still forwarded
//! - **Runtime**: anything else; fatal, the process exits non-zero
//!
//! The adapter backends have their own [`AdapterError`](crate::adapter::AdapterError)
//! which converts into [`MonitorError`].
//!
//! # Example
//!
//! ```rust
//! use scanwatch_core::error::{MonitorError, Result};
//!
//! fn check_interval(ms: u64) -> Result<()> {
//!     if ms == 0 {
//!         return Err(MonitorError::InvalidOption {
//!             field: "summary_interval_ms".into(),
//!             message: "must be positive".into(),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all scanwatch operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A run option has an invalid value.
    #[error("Invalid option '{field}': {message}")]
    InvalidOption {
        /// Option name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// The configuration sources could not be loaded or contain unknown keys.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    // =========================================================================
    // ADAPTER CALL ERRORS
    // =========================================================================
    /// The adapter rejected a start-scanning request.
    #[error("Scan start failed: {0}")]
    ScanStartFailed(String),

    /// The adapter rejected a stop-scanning request.
    #[error("Scan stop failed: {0}")]
    ScanStopFailed(String),

    // =========================================================================
    // CLASSIFICATION TAP ERRORS
    // =========================================================================
    /// The warning tap faulted while processing a message.
    #[error("Warning classification failed: {0}")]
    ClassificationFailed(String),

    // =========================================================================
    // RUNTIME ERRORS
    // =========================================================================
    /// The Bluetooth adapter could not be initialized.
    #[error("Bluetooth adapter unavailable: {0}. Ensure BlueZ is running and the adapter exists.")]
    AdapterUnavailable(String),

    /// The adapter event stream has already been taken or was closed.
    #[error("Adapter event stream unavailable")]
    EventStreamClosed,

    /// Any other unexpected failure.
    #[error("Unexpected runtime error: {0}")]
    Runtime(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for scanwatch operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

impl MonitorError {
    /// Returns `true` for invalid or unknown run options.
    #[inline]
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidOption { .. } | Self::ConfigLoad(_))
    }

    /// Returns `true` for failed scan start/stop calls.
    #[inline]
    #[must_use]
    pub const fn is_adapter_call_error(&self) -> bool {
        matches!(self, Self::ScanStartFailed(_) | Self::ScanStopFailed(_))
    }

    /// Returns `true` if the run continues after this error.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.is_adapter_call_error() || matches!(self, Self::ClassificationFailed(_))
    }

    /// Returns `true` if this error ends the run.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Process exit code for a run that ended with this error.
    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.is_recoverable() {
            0
        } else {
            1
        }
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidOption { .. } => "INVALID_OPTION",
            Self::ConfigLoad(_) => "CONFIG_LOAD_FAILED",
            Self::ScanStartFailed(_) => "SCAN_START_FAILED",
            Self::ScanStopFailed(_) => "SCAN_STOP_FAILED",
            Self::ClassificationFailed(_) => "CLASSIFICATION_FAILED",
            Self::AdapterUnavailable(_) => "ADAPTER_UNAVAILABLE",
            Self::EventStreamClosed => "EVENT_STREAM_CLOSED",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<config::ConfigError> for MonitorError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigLoad(err.to_string())
    }
}

impl From<crate::adapter::AdapterError> for MonitorError {
    fn from(err: crate::adapter::AdapterError) -> Self {
        use crate::adapter::AdapterError;
        match err {
            AdapterError::NotFound { .. } | AdapterError::Session { .. } => {
                Self::AdapterUnavailable(err.to_string())
            }
            AdapterError::StartScan { message } => Self::ScanStartFailed(message),
            AdapterError::StopScan { message } => Self::ScanStopFailed(message),
            AdapterError::EventsTaken => Self::EventStreamClosed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;

    #[test]
    fn test_configuration_error_classification() {
        let err = MonitorError::InvalidOption {
            field: "simulate_on_ms".into(),
            message: "must be positive".into(),
        };
        assert!(err.is_configuration_error());
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), 1);
        assert!(MonitorError::ConfigLoad("unknown field".into()).is_configuration_error());
        assert!(!MonitorError::ScanStartFailed("busy".into()).is_configuration_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(MonitorError::ScanStartFailed("busy".into()).is_recoverable());
        assert!(MonitorError::ScanStopFailed("busy".into()).is_recoverable());
        assert!(MonitorError::ClassificationFailed("panic".into()).is_recoverable());
        assert!(!MonitorError::EventStreamClosed.is_recoverable());
        assert!(MonitorError::Runtime("boom".into()).is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MonitorError::AdapterUnavailable("hci0".into()).error_code(),
            "ADAPTER_UNAVAILABLE"
        );
        assert_eq!(
            MonitorError::ScanStopFailed(String::new()).error_code(),
            "SCAN_STOP_FAILED"
        );
    }

    #[test]
    fn test_from_adapter_error() {
        let err: MonitorError = AdapterError::StartScan {
            message: "Operation already in progress".into(),
        }
        .into();
        assert!(matches!(err, MonitorError::ScanStartFailed(_)));

        let err: MonitorError = AdapterError::NotFound {
            name: "hci3".into(),
        }
        .into();
        assert!(matches!(err, MonitorError::AdapterUnavailable(_)));
        assert!(err.to_string().contains("hci3"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MonitorError = io_err.into();
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<MonitorError>();
        assert_sync::<MonitorError>();
    }
}
