//! Capture error types and handling
//!
//! This module defines the error type used throughout the capture pipeline.
//! Lookup failures (unknown sessions, unknown clients) are reported through
//! sentinels and return values, never through panics; this type covers the
//! failures that callers are expected to handle.

use crate::frame::SessionId;
use thiserror::Error;

/// Main error type for capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Session id did not resolve to an open session
    #[error("Session not found: {session}")]
    SessionNotFound {
        /// The session id that failed to resolve
        session: SessionId,
    },

    /// Device id did not resolve to a known device
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Device could not be created or started
    #[error("Device start failed: {device_id} - {reason}")]
    DeviceStartFailed {
        /// Device identifier
        device_id: String,
        /// Failure reason
        reason: String,
    },

    /// Operation arrived after the owning component began tearing down
    #[error("Capture manager is shutting down")]
    ShuttingDown,
}

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    /// Check if the error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            CaptureError::Io { .. } => true,
            CaptureError::DeviceEnumerationFailed { .. } => true,
            CaptureError::DeviceStartFailed { .. } => true,
            CaptureError::InvalidConfiguration { .. } => false,
            CaptureError::SessionNotFound { .. } => false,
            CaptureError::DeviceNotFound { .. } => false,
            CaptureError::ShuttingDown => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CaptureError::SessionNotFound {
            session: SessionId(7),
        };
        assert_eq!(error.to_string(), "Session not found: 7");

        let error = CaptureError::DeviceStartFailed {
            device_id: "cam0".to_string(),
            reason: "busy".to_string(),
        };
        assert_eq!(error.to_string(), "Device start failed: cam0 - busy");
    }

    #[test]
    fn test_recoverability() {
        assert!(CaptureError::DeviceStartFailed {
            device_id: "cam0".to_string(),
            reason: "busy".to_string(),
        }
        .is_recoverable());

        assert!(!CaptureError::SessionNotFound {
            session: SessionId::INVALID,
        }
        .is_recoverable());
    }
}
