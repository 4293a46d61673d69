// Data model shared by the analysis pipeline, the stream service and the
// slice history store.
//
// All records serialize to plain JSON objects with camelCase keys. Every
// floating point field is kept finite by the producers (RMS is floored,
// empty windows never produce a summary), so records round-trip losslessly
// through serde_json.

use serde::{Deserialize, Serialize};

use crate::analysis::score::ScoreOptions;

/// One instantaneous measurement produced per frame tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseFrameSample {
    /// Timestamp in milliseconds (non-decreasing within a stream)
    pub t: u64,
    /// Root-mean-square amplitude in normalized full-scale units, floored to
    /// [`RMS_EPSILON`](crate::analysis::frame::RMS_EPSILON)
    pub rms: f64,
    /// `20 * log10(rms)`
    pub dbfs: f64,
    /// Maximum absolute sample amplitude in the frame
    pub peak: f64,
}

/// Point in the realtime chart buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseRealtimePoint {
    pub t: u64,
    pub value: f64,
}

/// Statistics accumulated over one slice window, in dBFS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseSliceRawStats {
    pub avg_dbfs: f64,
    pub max_dbfs: f64,
    pub p50_dbfs: f64,
    pub p95_dbfs: f64,
    /// Fraction of window time spent above the score threshold, in [0, 1]
    pub over_ratio_dbfs: f64,
    /// Distinct above-threshold events after gap merging
    pub segment_count: u32,
}

/// Baseline-calibrated values shown to end users
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseSliceDisplayStats {
    pub avg_db: f64,
    pub p95_db: f64,
}

/// Explainable decomposition of a slice score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseScoreBreakdown {
    pub sustained_penalty: f64,
    pub time_penalty: f64,
    pub segment_penalty: f64,
    pub thresholds: ScoreOptions,
    pub sustained_level_dbfs: f64,
    pub over_ratio_dbfs: f64,
    pub segment_count: u32,
    pub minutes: f64,
}

/// Finalized slice, the unit of persisted history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseSliceSummary {
    pub start: u64,
    pub end: u64,
    pub frames: u32,
    pub raw: NoiseSliceRawStats,
    pub display: NoiseSliceDisplayStats,
    /// 0-100, higher is quieter
    pub score: u8,
    pub score_detail: NoiseScoreBreakdown,
}

impl NoiseSliceSummary {
    /// Duration covered by the slice window in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Stream status exposed to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseStreamStatus {
    Initializing,
    Quiet,
    Noisy,
    PermissionDenied,
    Error,
}

impl NoiseStreamStatus {
    /// True when capture is running and levels are being reported
    pub fn is_live(&self) -> bool {
        matches!(self, NoiseStreamStatus::Quiet | NoiseStreamStatus::Noisy)
    }

    /// True for states that need a `retry()` to recover
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            NoiseStreamStatus::PermissionDenied | NoiseStreamStatus::Error
        )
    }
}
