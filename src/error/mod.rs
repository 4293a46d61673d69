// Error types for the noise monitor
//
// This module defines typed error enums for capture, offline analysis,
// persistence and configuration, each carrying a stable numeric code so UI shells and the
// CLI can react to failures without matching on message text.

mod analysis;
mod capture;
mod config;
mod storage;

pub use analysis::{AnalysisError, AnalysisErrorCodes};
pub use capture::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use config::{ConfigError, ConfigErrorCodes};
pub use storage::{log_storage_error, StorageError, StorageErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the service boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
