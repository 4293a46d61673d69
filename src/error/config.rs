// Configuration error types and constants

use crate::error::ErrorCode;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 4001-4002
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// A setting is out of range or non-finite
    pub const INVALID: i32 = 4001;

    /// Config file could not be read or parsed
    pub const IO: i32 = 4002;
}

/// Settings validation and loading errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Invalid { field: &'static str, reason: String },
    Io { details: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::Invalid { .. } => ConfigErrorCodes::INVALID,
            ConfigError::Io { .. } => ConfigErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::Invalid { field, reason } => {
                format!("Invalid setting {}: {}", field, reason)
            }
            ConfigError::Io { details } => format!("Config I/O failed: {}", details),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message_names_field() {
        let err = ConfigError::Invalid {
            field: "frame_ms",
            reason: "must be > 0".to_string(),
        };
        assert_eq!(err.code(), ConfigErrorCodes::INVALID);
        assert!(err.message().contains("frame_ms"));
    }
}
