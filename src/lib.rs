// Noise Monitor Core - ambient noise level monitoring
// Periodic frame sampling, slice scoring and rolling slice history

// Module declarations
pub mod analysis;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod managers;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use analysis::{analyze_pcm, analyze_wav, compute_noise_slice_score, ScoreOptions};
pub use calibration::CalibrationState;
pub use config::{AppConfig, NoiseSettings, SettingsPatch};
pub use engine::{NoiseStreamService, NoiseStreamSnapshot, ServiceOptions, Subscription};
pub use storage::{JsonlSliceStore, MemorySliceStore, SliceStore};
pub use types::{
    NoiseFrameSample, NoiseRealtimePoint, NoiseScoreBreakdown, NoiseSliceDisplayStats,
    NoiseSliceRawStats, NoiseSliceSummary, NoiseStreamStatus,
};
