//! Engine module housing the capture and streaming core.
//!
//! `backend` abstracts the microphone (real cpal device or scripted signal)
//! and the clock; `core` is the `NoiseStreamService` orchestration layer
//! that turns frames into snapshots, slices and telemetry.

pub mod backend;
pub mod core;

pub use backend::{
    AnalyserNode, CaptureBackend, CaptureSession, CpalCaptureBackend, ScriptedCaptureBackend,
    ScriptedSignal, SystemTimeSource, TimeSource, TokioClock,
};
pub use core::{
    NoiseStreamService, NoiseStreamSnapshot, ServiceOptions, Subscription, TelemetryEvent,
    TelemetryEventKind, DEFAULT_STOP_DEBOUNCE,
};
