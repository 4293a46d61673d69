// Analysis module - frame, slice and score pipeline
//
// This module turns raw time-domain audio into the persisted slice history
// and the realtime chart points consumed by the stream service.
//
// Architecture:
// - FrameProcessor: periodic tick reading the analyser, emits NoiseFrameSample
// - Pipeline: SliceAggregator → {SegmentTracker, stats, score engine, RealtimeRingBuffer}
// - Output: NoiseSliceSummary per closed window, display-dB points per frame
// - Offline: the same pipeline over decoded PCM/WAV, stamped with audio time

pub mod aggregator;
pub mod average;
pub mod frame;
pub mod offline;
pub mod ring_buffer;
pub mod score;
pub mod segments;
pub mod stats;

pub use aggregator::{SliceAggregator, SliceConfig};
pub use average::TimeWeightedAverage;
pub use frame::{compute_frame, rms_to_dbfs, FrameProcessor, MIN_FRAME_INTERVAL_MS, RMS_EPSILON};
pub use offline::{analyze_pcm, analyze_wav};
pub use ring_buffer::RealtimeRingBuffer;
pub use score::{compute_noise_slice_score, NoiseSliceScore, ScoreOptions};
pub use segments::{SegmentState, SegmentTracker};
pub use stats::{percentile, summarize, WindowStats};
