// Score engine - three-term weighted penalty model over slice statistics
//
// Pure transform: raw stats + window duration -> 0..=100 score and a
// breakdown explaining which term cost how much.

use serde::{Deserialize, Serialize};

use crate::types::{NoiseScoreBreakdown, NoiseSliceRawStats};

pub const DEFAULT_SCORE_THRESHOLD_DBFS: f64 = -35.0;
pub const DEFAULT_SEGMENT_MERGE_GAP_MS: u64 = 300;
pub const DEFAULT_MAX_SEGMENTS_PER_MIN: f64 = 6.0;

/// dB above threshold at which the sustained penalty saturates
const SUSTAINED_SATURATION_DB: f64 = 6.0;
/// Duty cycle at which the time penalty saturates
const TIME_SATURATION_RATIO: f64 = 0.3;
const MIN_MINUTES: f64 = 1e-6;

const SUSTAINED_WEIGHT: f64 = 0.55;
const TIME_WEIGHT: f64 = 0.30;
const SEGMENT_WEIGHT: f64 = 0.15;

/// Thresholds the score engine is parameterized by
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreOptions {
    pub score_threshold_dbfs: f64,
    pub max_segments_per_min: f64,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        Self {
            score_threshold_dbfs: DEFAULT_SCORE_THRESHOLD_DBFS,
            max_segments_per_min: DEFAULT_MAX_SEGMENTS_PER_MIN,
        }
    }
}

/// Score plus its explainable breakdown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSliceScore {
    pub score: u8,
    pub score_detail: NoiseScoreBreakdown,
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Compute the 0-100 quiet score of one slice
///
/// The score depends only on where `p50_dbfs` sits relative to the
/// threshold, on the duty cycle and on the event rate; shifting every dB
/// input and the threshold by the same amount leaves it unchanged.
pub fn compute_noise_slice_score(
    raw: &NoiseSliceRawStats,
    duration_ms: u64,
    options: &ScoreOptions,
) -> NoiseSliceScore {
    let minutes = (duration_ms as f64 / 60_000.0).max(MIN_MINUTES);
    let segments_per_min = raw.segment_count as f64 / minutes;

    let sustained_penalty =
        clamp01((raw.p50_dbfs - options.score_threshold_dbfs) / SUSTAINED_SATURATION_DB);
    let time_penalty = clamp01(raw.over_ratio_dbfs / TIME_SATURATION_RATIO);
    let segment_penalty = if options.max_segments_per_min > 0.0 {
        clamp01(segments_per_min / options.max_segments_per_min)
    } else if raw.segment_count > 0 {
        1.0
    } else {
        0.0
    };

    let penalty = SUSTAINED_WEIGHT * sustained_penalty
        + TIME_WEIGHT * time_penalty
        + SEGMENT_WEIGHT * segment_penalty;
    let score = (100.0 * (1.0 - penalty)).clamp(0.0, 100.0).round() as u8;

    NoiseSliceScore {
        score,
        score_detail: NoiseScoreBreakdown {
            sustained_penalty,
            time_penalty,
            segment_penalty,
            thresholds: *options,
            sustained_level_dbfs: raw.p50_dbfs,
            over_ratio_dbfs: raw.over_ratio_dbfs,
            segment_count: raw.segment_count,
            minutes,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(p50: f64, over_ratio: f64, segments: u32) -> NoiseSliceRawStats {
        NoiseSliceRawStats {
            avg_dbfs: p50,
            max_dbfs: p50 + 6.0,
            p50_dbfs: p50,
            p95_dbfs: p50 + 4.0,
            over_ratio_dbfs: over_ratio,
            segment_count: segments,
        }
    }

    #[test]
    fn test_quiet_slice_scores_high() {
        let result = compute_noise_slice_score(&raw(-70.0, 0.0, 0), 2_000, &ScoreOptions::default());
        assert!(result.score >= 95, "score {}", result.score);
        assert_eq!(result.score, 100);
        assert_eq!(result.score_detail.sustained_penalty, 0.0);
    }

    #[test]
    fn test_uniform_shift_with_threshold_is_invariant() {
        let base_options = ScoreOptions::default();
        let base = compute_noise_slice_score(&raw(-33.0, 0.12, 2), 2_000, &base_options);

        for shift in [-20.0, -7.5, 3.0, 11.0] {
            let shifted = raw(-33.0 + shift, 0.12, 2);
            let options = ScoreOptions {
                score_threshold_dbfs: base_options.score_threshold_dbfs + shift,
                ..base_options
            };
            let result = compute_noise_slice_score(&shifted, 2_000, &options);
            assert_eq!(result.score, base.score, "shift {}", shift);
        }
    }

    #[test]
    fn test_sustained_level_is_monotonic() {
        let options = ScoreOptions::default();
        let mut previous = u8::MAX;
        for p50 in [-35.0, -34.0, -33.0, -32.0, -31.0, -30.0] {
            let result = compute_noise_slice_score(&raw(p50, 0.0, 0), 2_000, &options);
            assert!(result.score < previous, "p50 {} -> {}", p50, result.score);
            previous = result.score;
        }
    }

    #[test]
    fn test_segment_rate_is_monotonic_until_saturation() {
        let options = ScoreOptions::default();
        // One-minute window: 6 segments saturate the penalty
        let mut previous = u8::MAX;
        for segments in 0..=6 {
            let result = compute_noise_slice_score(&raw(-50.0, 0.0, segments), 60_000, &options);
            assert!(result.score < previous, "segments {}", segments);
            previous = result.score;
        }
        let saturated = compute_noise_slice_score(&raw(-50.0, 0.0, 12), 60_000, &options);
        assert_eq!(saturated.score, previous);
        assert_eq!(saturated.score_detail.segment_penalty, 1.0);
    }

    #[test]
    fn test_fully_penalized_slice_scores_zero() {
        let result = compute_noise_slice_score(&raw(-10.0, 1.0, 50), 2_000, &ScoreOptions::default());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_breakdown_reports_inputs() {
        let result = compute_noise_slice_score(&raw(-33.0, 0.15, 1), 30_000, &ScoreOptions::default());
        let detail = result.score_detail;
        assert_eq!(detail.sustained_level_dbfs, -33.0);
        assert_eq!(detail.over_ratio_dbfs, 0.15);
        assert_eq!(detail.segment_count, 1);
        assert!((detail.minutes - 0.5).abs() < 1e-12);
        assert!((detail.sustained_penalty - 2.0 / 6.0).abs() < 1e-12);
        assert!((detail.time_penalty - 0.5).abs() < 1e-12);
        assert!((detail.segment_penalty - 2.0 / 6.0).abs() < 1e-12);
        // 100 * (1 - (0.1833 + 0.15 + 0.05)) = 61.67
        assert_eq!(result.score, 62);
    }

    #[test]
    fn test_zero_duration_and_nan_inputs_stay_finite() {
        let mut stats = raw(-50.0, f64::NAN, 1);
        stats.p50_dbfs = f64::NAN;
        let result = compute_noise_slice_score(&stats, 0, &ScoreOptions::default());
        assert_eq!(result.score_detail.minutes, MIN_MINUTES);
        assert_eq!(result.score_detail.sustained_penalty, 0.0);
        assert_eq!(result.score_detail.time_penalty, 0.0);
        assert_eq!(result.score_detail.segment_penalty, 1.0);
        assert_eq!(result.score, 85);
    }
}
