//! Capture abstractions for the stream service.
//!
//! The service never talks to audio hardware directly. A [`CaptureBackend`]
//! opens a [`CaptureSession`] asynchronously (this is where permission and
//! device failures surface), and the session hands out an [`AnalyserNode`]
//! the frame processor reads on every tick. Teardown is awaited so the
//! service can guarantee the previous handle is released before a new one
//! is opened.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

use crate::error::CaptureError;

/// Live analysis handle yielding the most recent time-domain samples
pub trait AnalyserNode: Send + Sync {
    /// Number of samples written by each `get_time_domain_data` call
    fn fft_size(&self) -> usize;

    /// Fill `out` with the newest samples, oldest first; missing history reads as silence
    fn get_time_domain_data(&self, out: &mut [f32]);
}

/// An open capture graph
pub trait CaptureSession: Send {
    fn analyser(&self) -> Arc<dyn AnalyserNode>;

    /// Release the input device; resolves once the hardware handle is gone
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Factory for capture sessions
///
/// Implemented by the platform backend (cpal) and by the scripted backend
/// used in tests and simulations.
pub trait CaptureBackend: Send + Sync {
    fn open(&self) -> BoxFuture<'static, Result<Box<dyn CaptureSession>, CaptureError>>;
}

/// Millisecond clock used to stamp frames and telemetry
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time source (milliseconds since the Unix epoch)
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Monotonic clock on tokio's time source, starting at zero
///
/// Follows paused/advanced time in `#[tokio::test(start_paused = true)]`.
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

mod cpal;
pub use self::cpal::CpalCaptureBackend;

mod stub;
pub use stub::{ScriptedCaptureBackend, ScriptedSignal};
