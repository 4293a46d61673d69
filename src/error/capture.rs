// Capture error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Capture error code constants
///
/// Error code range: 1001-1005
pub struct CaptureErrorCodes {}

impl CaptureErrorCodes {
    /// Microphone permission denied by the OS or the user
    pub const PERMISSION_DENIED: i32 = 1001;

    /// No usable input device
    pub const DEVICE_UNAVAILABLE: i32 = 1002;

    /// Failed to open or start the input stream
    pub const STREAM_OPEN_FAILED: i32 = 1003;

    /// Device sample format is not supported
    pub const UNSUPPORTED_FORMAT: i32 = 1004;

    /// Stream disconnected or failed after start
    pub const STREAM_FAILURE: i32 = 1005;
}

/// Log a capture error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=CaptureBackend, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Capture-related errors
///
/// These errors cover acquiring the input device, building the analysis
/// path and the running stream. The stream service translates them into
/// `permission-denied` or `error` status values.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Microphone permission denied
    PermissionDenied,

    /// No input device found or device disappeared
    DeviceUnavailable { details: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Sample format not handled by the analyser
    UnsupportedFormat { format: String },

    /// Stream failed after it was started
    StreamFailure { reason: String },
}

impl CaptureError {
    /// True for the permission class of setup failures
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied)
    }
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::PermissionDenied => CaptureErrorCodes::PERMISSION_DENIED,
            CaptureError::DeviceUnavailable { .. } => CaptureErrorCodes::DEVICE_UNAVAILABLE,
            CaptureError::StreamOpenFailed { .. } => CaptureErrorCodes::STREAM_OPEN_FAILED,
            CaptureError::UnsupportedFormat { .. } => CaptureErrorCodes::UNSUPPORTED_FORMAT,
            CaptureError::StreamFailure { .. } => CaptureErrorCodes::STREAM_FAILURE,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            CaptureError::DeviceUnavailable { details } => {
                format!("Input device unavailable: {}", details)
            }
            CaptureError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            CaptureError::UnsupportedFormat { format } => {
                format!("Unsupported input sample format: {}", format)
            }
            CaptureError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return CaptureError::PermissionDenied;
        }
        CaptureError::DeviceUnavailable {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_codes() {
        assert_eq!(CaptureError::PermissionDenied.code(), 1001);
        assert_eq!(
            CaptureError::DeviceUnavailable {
                details: "test".to_string()
            }
            .code(),
            CaptureErrorCodes::DEVICE_UNAVAILABLE
        );
        assert_eq!(
            CaptureError::StreamOpenFailed {
                reason: "test".to_string()
            }
            .code(),
            CaptureErrorCodes::STREAM_OPEN_FAILED
        );
        assert_eq!(
            CaptureError::UnsupportedFormat {
                format: "I24".to_string()
            }
            .code(),
            CaptureErrorCodes::UNSUPPORTED_FORMAT
        );
        assert_eq!(
            CaptureError::StreamFailure {
                reason: "test".to_string()
            }
            .code(),
            1005
        );
    }

    #[test]
    fn test_capture_error_messages() {
        let err = CaptureError::PermissionDenied;
        assert!(err.message().contains("permission denied"));

        let err = CaptureError::UnsupportedFormat {
            format: "U8".to_string(),
        };
        assert_eq!(err.message(), "Unsupported input sample format: U8");

        let display = format!(
            "{}",
            CaptureError::StreamFailure {
                reason: "device unplugged".to_string()
            }
        );
        assert!(display.contains("CaptureError"));
        assert!(display.contains("1005"));
        assert!(display.contains("device unplugged"));
    }

    #[test]
    fn test_io_permission_error_maps_to_permission_class() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: CaptureError = io_err.into();
        assert!(err.is_permission_denied());

        let io_err = std::io::Error::other("device busy");
        let err: CaptureError = io_err.into();
        assert!(!err.is_permission_denied());
        match err {
            CaptureError::DeviceUnavailable { details } => assert!(details.contains("busy")),
            other => panic!("Expected DeviceUnavailable, got {:?}", other),
        }
    }
}
