//! Configuration management for the noise monitor
//!
//! Settings arrive from the host application as loosely shaped JSON. They are
//! resolved once into [`NoiseSettings`] with explicit defaults and then split
//! into the typed parts each component consumes ([`SliceConfig`],
//! [`ScoreOptions`], [`CalibrationState`]), so nothing downstream re-validates
//! optional fields per read.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::aggregator::SliceConfig;
use crate::analysis::frame::MIN_FRAME_INTERVAL_MS;
use crate::analysis::score::ScoreOptions;
use crate::calibration::CalibrationState;
use crate::error::ConfigError;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub noise: NoiseSettings,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
}

/// Live monitoring settings, reactive to change events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NoiseSettings {
    /// Display-dB level above which the smoothed state is "noisy"
    pub max_level_db: f64,
    /// Display dB assigned to `baseline_rms`
    pub baseline_db: f64,
    /// Reference RMS for a known quiet level (0 = uncalibrated)
    pub baseline_rms: f64,
    /// UI flag, carried through to snapshots only
    pub show_realtime_db: bool,
    /// UI flag, carried through to snapshots only
    pub alert_sound_enabled: bool,
    /// Time-weighted averaging window for the quiet/noisy state
    pub avg_window_sec: f64,
    /// Frame tick interval (clamped to >= 10 ms)
    pub frame_ms: u64,
    /// Slice window duration
    pub slice_sec: f64,
    /// dBFS level counted as "over" by the score engine
    pub score_threshold_dbfs: f64,
    /// Above-threshold runs separated by at most this gap merge into one segment
    pub segment_merge_gap_ms: u64,
    /// Event frequency at which the segment penalty saturates
    pub max_segments_per_min: f64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            max_level_db: 55.0,
            baseline_db: 40.0,
            baseline_rms: 0.0,
            show_realtime_db: true,
            alert_sound_enabled: false,
            avg_window_sec: 3.0,
            frame_ms: 50,
            slice_sec: 2.0,
            score_threshold_dbfs: -35.0,
            segment_merge_gap_ms: 300,
            max_segments_per_min: 6.0,
        }
    }
}

/// Partial settings update delivered over the settings channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    pub max_level_db: Option<f64>,
    pub baseline_db: Option<f64>,
    pub baseline_rms: Option<f64>,
    pub show_realtime_db: Option<bool>,
    pub alert_sound_enabled: Option<bool>,
    pub avg_window_sec: Option<f64>,
    pub frame_ms: Option<u64>,
    pub slice_sec: Option<f64>,
    pub score_threshold_dbfs: Option<f64>,
    pub segment_merge_gap_ms: Option<u64>,
    pub max_segments_per_min: Option<f64>,
}

impl NoiseSettings {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("max_level_db", self.max_level_db),
            ("baseline_db", self.baseline_db),
            ("baseline_rms", self.baseline_rms),
            ("avg_window_sec", self.avg_window_sec),
            ("slice_sec", self.slice_sec),
            ("score_threshold_dbfs", self.score_threshold_dbfs),
            ("max_segments_per_min", self.max_segments_per_min),
        ];
        for (field, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be finite (got {})", value),
                });
            }
        }
        if self.baseline_rms < 0.0 {
            return Err(ConfigError::Invalid {
                field: "baseline_rms",
                reason: "must be >= 0".to_string(),
            });
        }
        if self.slice_sec <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "slice_sec",
                reason: "must be > 0".to_string(),
            });
        }
        if self.avg_window_sec <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "avg_window_sec",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_segments_per_min <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "max_segments_per_min",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Frame tick interval, never shorter than 10 ms
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms.max(MIN_FRAME_INTERVAL_MS))
    }

    pub fn avg_window_ms(&self) -> u64 {
        (self.avg_window_sec * 1000.0).round().max(1.0) as u64
    }

    pub fn score_options(&self) -> ScoreOptions {
        ScoreOptions {
            score_threshold_dbfs: self.score_threshold_dbfs,
            max_segments_per_min: self.max_segments_per_min,
        }
    }

    pub fn slice_config(&self) -> SliceConfig {
        SliceConfig {
            slice_ms: (self.slice_sec * 1000.0).round().max(1.0) as u64,
            segment_merge_gap_ms: self.segment_merge_gap_ms,
            score: self.score_options(),
        }
    }

    pub fn calibration(&self) -> CalibrationState {
        CalibrationState::new(self.baseline_rms, self.baseline_db)
    }

    /// True when switching from `self` to `other` needs a pipeline restart
    ///
    /// The aggregator's open window cannot be resized or re-thresholded live,
    /// so sampling cadence, slice length and score thresholds all restart.
    pub fn requires_restart(&self, other: &NoiseSettings) -> bool {
        self.frame_interval() != other.frame_interval()
            || self.slice_config() != other.slice_config()
    }

    /// Copy of these settings with every `Some` field of the patch applied
    pub fn patched(&self, patch: &SettingsPatch) -> NoiseSettings {
        let mut next = self.clone();
        if let Some(v) = patch.max_level_db {
            next.max_level_db = v;
        }
        if let Some(v) = patch.baseline_db {
            next.baseline_db = v;
        }
        if let Some(v) = patch.baseline_rms {
            next.baseline_rms = v;
        }
        if let Some(v) = patch.show_realtime_db {
            next.show_realtime_db = v;
        }
        if let Some(v) = patch.alert_sound_enabled {
            next.alert_sound_enabled = v;
        }
        if let Some(v) = patch.avg_window_sec {
            next.avg_window_sec = v;
        }
        if let Some(v) = patch.frame_ms {
            next.frame_ms = v;
        }
        if let Some(v) = patch.slice_sec {
            next.slice_sec = v;
        }
        if let Some(v) = patch.score_threshold_dbfs {
            next.score_threshold_dbfs = v;
        }
        if let Some(v) = patch.segment_merge_gap_ms {
            next.segment_merge_gap_ms = v;
        }
        if let Some(v) = patch.max_segments_per_min {
            next.max_segments_per_min = v;
        }
        next
    }
}

/// Capture-side and realtime chart parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Samples returned per analyser read
    pub fft_size: usize,
    /// Realtime chart retention window
    pub ring_retention_sec: u64,
    /// Realtime chart hard capacity
    pub ring_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            ring_retention_sec: 300,
            ring_capacity: 6000,
        }
    }
}

/// Slice history persistence parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub history_path: PathBuf,
    pub retention_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_path: PathBuf::from("noise_history.jsonl"),
            retention_hours: 24,
        }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// A missing file, invalid JSON or settings that fail validation fall
    /// back to the defaults with a warning.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.noise.validate() {
                    Ok(()) => {
                        log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                        config
                    }
                    Err(err) => {
                        log::warn!(
                            "[Config] Rejected settings in {:?}: {}. Using defaults.",
                            path.as_ref(),
                            err
                        );
                        Self::default()
                    }
                },
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the working directory
    pub fn load() -> Self {
        Self::load_from_file("noise_monitor.json")
    }
}
