// CalibrationState - baseline reference for display-dB conversion
//
// Calibrated mapping:   display = baseline_db + 20*log10(rms / baseline_rms)
// Uncalibrated mapping: display = clamp(20, 100, 20*log10(rms / 1e-3) + 60)

use crate::analysis::frame::RMS_EPSILON;
use crate::error::ConfigError;

/// Reference RMS used by the uncalibrated mapping
const UNCALIBRATED_REFERENCE_RMS: f64 = 1e-3;
/// Display dB assigned to the uncalibrated reference
const UNCALIBRATED_OFFSET_DB: f64 = 60.0;
const UNCALIBRATED_MIN_DB: f64 = 20.0;
const UNCALIBRATED_MAX_DB: f64 = 100.0;

/// CalibrationState stores the baseline used for display-dB conversion
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationState {
    /// Reference RMS for a known quiet level; 0 means uncalibrated
    pub baseline_rms: f64,
    /// Display dB assigned to `baseline_rms`
    pub display_baseline_db: f64,
}

impl CalibrationState {
    pub fn new(baseline_rms: f64, display_baseline_db: f64) -> Self {
        Self {
            baseline_rms,
            display_baseline_db,
        }
    }

    /// Uncalibrated state with the default 40 dB baseline label
    pub fn new_default() -> Self {
        Self::new(0.0, 40.0)
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline_rms.is_finite() && self.baseline_rms > 0.0
    }

    /// Map a frame RMS to display dB
    pub fn display_db_from_rms(&self, rms: f64) -> f64 {
        let rms = if rms.is_finite() {
            rms.max(RMS_EPSILON)
        } else {
            RMS_EPSILON
        };

        if self.is_calibrated() {
            self.display_baseline_db + 20.0 * (rms / self.baseline_rms).log10()
        } else {
            (20.0 * (rms / UNCALIBRATED_REFERENCE_RMS).log10() + UNCALIBRATED_OFFSET_DB)
                .clamp(UNCALIBRATED_MIN_DB, UNCALIBRATED_MAX_DB)
        }
    }

    /// Map a dBFS statistic to display dB through the same baseline
    pub fn display_db_from_dbfs(&self, dbfs: f64) -> f64 {
        self.display_db_from_rms(10f64.powf(dbfs / 20.0))
    }

    /// Measure a baseline from RMS values captured in a quiet room
    ///
    /// # Arguments
    /// * `rms_samples` - Frame RMS values taken while the room was quiet
    /// * `display_baseline_db` - Display dB the user assigns to that level
    ///
    /// # Returns
    /// * `Ok(CalibrationState)` - Baseline at the mean RMS of the samples
    /// * `Err(ConfigError)` - No samples, or samples not finite and positive
    pub fn from_rms_samples(
        rms_samples: &[f64],
        display_baseline_db: f64,
    ) -> Result<Self, ConfigError> {
        if rms_samples.is_empty() {
            return Err(ConfigError::Invalid {
                field: "baseline_rms",
                reason: "no frames captured for calibration".to_string(),
            });
        }
        if !display_baseline_db.is_finite() {
            return Err(ConfigError::Invalid {
                field: "baseline_db",
                reason: format!("must be finite (got {})", display_baseline_db),
            });
        }
        if let Some(bad) = rms_samples.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(ConfigError::Invalid {
                field: "baseline_rms",
                reason: format!("calibration frame RMS {} is not a positive number", bad),
            });
        }

        let mean = rms_samples.iter().sum::<f64>() / rms_samples.len() as f64;
        Ok(Self::new(mean.max(RMS_EPSILON), display_baseline_db))
    }
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::new_default()
    }
}
