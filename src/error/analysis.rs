// Offline analysis error types and constants

use crate::error::ErrorCode;
use std::fmt;

/// Analysis error code constants
///
/// Error code range: 2001-2003
pub struct AnalysisErrorCodes {}

impl AnalysisErrorCodes {
    /// Recording could not be opened or read
    pub const IO: i32 = 2001;

    /// Recording is not a decodable WAV file
    pub const DECODE: i32 = 2002;

    /// WAV layout the analyser does not handle
    pub const UNSUPPORTED_FORMAT: i32 = 2003;
}

/// Errors from decoding a recording for offline scoring
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    Io { details: String },
    Decode { reason: String },
    UnsupportedFormat { format: String },
}

impl AnalysisError {
    /// Classify a decoder failure, prefixing the recording path
    pub fn from_wav(path: &std::path::Path, err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => AnalysisError::Io {
                details: format!("{}: {io}", path.display()),
            },
            hound::Error::Unsupported => AnalysisError::UnsupportedFormat {
                format: format!("{}: {}", path.display(), hound::Error::Unsupported),
            },
            other => AnalysisError::Decode {
                reason: format!("{}: {other}", path.display()),
            },
        }
    }
}

impl ErrorCode for AnalysisError {
    fn code(&self) -> i32 {
        match self {
            AnalysisError::Io { .. } => AnalysisErrorCodes::IO,
            AnalysisError::Decode { .. } => AnalysisErrorCodes::DECODE,
            AnalysisError::UnsupportedFormat { .. } => AnalysisErrorCodes::UNSUPPORTED_FORMAT,
        }
    }

    fn message(&self) -> String {
        match self {
            AnalysisError::Io { details } => format!("Could not read recording: {}", details),
            AnalysisError::Decode { reason } => format!("Recording is not valid WAV: {}", reason),
            AnalysisError::UnsupportedFormat { format } => {
                format!("Unsupported recording format: {}", format)
            }
        }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AnalysisError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AnalysisError {}
