// Slice history storage error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Storage error code constants
///
/// Error code range: 3001-3004
pub struct StorageErrorCodes {}

impl StorageErrorCodes {
    /// Reading or writing the history file failed
    pub const IO: i32 = 3001;

    /// A record could not be encoded or decoded
    pub const SERIALIZATION: i32 = 3002;

    /// Stored history is unreadable
    pub const CORRUPT: i32 = 3003;

    /// Store lock was poisoned
    pub const LOCK_POISONED: i32 = 3004;
}

/// Log a storage error with structured context
pub fn log_storage_error(err: &StorageError, context: &str) {
    error!(
        "Storage error in {}: code={}, component=SliceStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Slice persistence errors
///
/// The stream service never propagates these past its own boundary; a
/// failed write only costs durability.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    Io { details: String },
    Serialization { reason: String },
    Corrupt { reason: String },
    LockPoisoned,
}

impl ErrorCode for StorageError {
    fn code(&self) -> i32 {
        match self {
            StorageError::Io { .. } => StorageErrorCodes::IO,
            StorageError::Serialization { .. } => StorageErrorCodes::SERIALIZATION,
            StorageError::Corrupt { .. } => StorageErrorCodes::CORRUPT,
            StorageError::LockPoisoned => StorageErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            StorageError::Io { details } => format!("History I/O failed: {}", details),
            StorageError::Serialization { reason } => {
                format!("History record encoding failed: {}", reason)
            }
            StorageError::Corrupt { reason } => format!("History is corrupt: {}", reason),
            StorageError::LockPoisoned => "Slice store lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StorageError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: err.to_string(),
        }
    }
}
