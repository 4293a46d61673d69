// Slice aggregator - turns the frame stream into fixed-duration slice summaries
//
// Every frame is mapped to display dB and pushed to the realtime ring buffer,
// then folded into the open window: dBFS values for the descriptive stats,
// a time-weighted duty cycle above the score threshold, and the segment
// state machine. Once the window spans `slice_ms` it is closed, scored and
// returned; the next frame opens a fresh window.

use crate::analysis::frame::rms_to_dbfs;
use crate::analysis::ring_buffer::RealtimeRingBuffer;
use crate::analysis::score::{
    compute_noise_slice_score, ScoreOptions, DEFAULT_SEGMENT_MERGE_GAP_MS,
};
use crate::analysis::segments::SegmentTracker;
use crate::analysis::stats::summarize;
use crate::calibration::CalibrationState;
use crate::types::{
    NoiseFrameSample, NoiseRealtimePoint, NoiseSliceDisplayStats, NoiseSliceRawStats,
    NoiseSliceSummary,
};

/// Window parameters fixed for the lifetime of an aggregator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceConfig {
    /// Window length; a window closes on the first frame at or past this span
    pub slice_ms: u64,
    pub segment_merge_gap_ms: u64,
    pub score: ScoreOptions,
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            slice_ms: 2_000,
            segment_merge_gap_ms: DEFAULT_SEGMENT_MERGE_GAP_MS,
            score: ScoreOptions::default(),
        }
    }
}

/// Accumulator for the currently open window
#[derive(Debug)]
struct SliceWindow {
    start: u64,
    dbfs: Vec<f64>,
    last: (u64, f64),
    over_ms: u64,
    segments: SegmentTracker,
}

impl SliceWindow {
    fn open(frame_t: u64, dbfs: f64, config: &SliceConfig) -> Self {
        let mut segments = SegmentTracker::new(config.segment_merge_gap_ms);
        segments.observe(frame_t, dbfs >= config.score.score_threshold_dbfs);
        Self {
            start: frame_t,
            dbfs: vec![dbfs],
            last: (frame_t, dbfs),
            over_ms: 0,
            segments,
        }
    }

    fn push(&mut self, t: u64, dbfs: f64, config: &SliceConfig) {
        let threshold = config.score.score_threshold_dbfs;
        let (prev_t, prev_dbfs) = self.last;
        // Clock regressions contribute no time
        let dt = t.saturating_sub(prev_t);
        if prev_dbfs > threshold || dbfs > threshold {
            self.over_ms = self.over_ms.saturating_add(dt);
        }

        self.segments.observe(t, dbfs >= threshold);
        self.dbfs.push(dbfs);
        self.last = (t.max(prev_t), dbfs);
    }

    fn elapsed_ms(&self) -> u64 {
        self.last.0.saturating_sub(self.start)
    }
}

/// Streaming slice aggregator; owns the realtime ring buffer it feeds
#[derive(Debug)]
pub struct SliceAggregator {
    config: SliceConfig,
    calibration: CalibrationState,
    ring: RealtimeRingBuffer,
    window: Option<SliceWindow>,
}

impl SliceAggregator {
    pub fn new(config: SliceConfig, calibration: CalibrationState, ring: RealtimeRingBuffer) -> Self {
        Self {
            config,
            calibration,
            ring,
            window: None,
        }
    }

    pub fn config(&self) -> &SliceConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    /// Swap the display mapping; raw dBFS history is unaffected
    pub fn set_calibration(&mut self, calibration: CalibrationState) {
        self.calibration = calibration;
    }

    pub fn ring_buffer(&self) -> &RealtimeRingBuffer {
        &self.ring
    }

    /// Frames accumulated in the open window
    pub fn pending_frames(&self) -> usize {
        self.window.as_ref().map_or(0, |w| w.dbfs.len())
    }

    /// Process one frame; returns the summary when this frame closes a window
    pub fn on_frame(&mut self, frame: &NoiseFrameSample) -> Option<NoiseSliceSummary> {
        let dbfs = if frame.dbfs.is_finite() {
            frame.dbfs
        } else {
            rms_to_dbfs(frame.rms)
        };

        self.ring.push(NoiseRealtimePoint {
            t: frame.t,
            value: self.calibration.display_db_from_rms(frame.rms),
        });

        match self.window.as_mut() {
            Some(window) => window.push(frame.t, dbfs, &self.config),
            None => self.window = Some(SliceWindow::open(frame.t, dbfs, &self.config)),
        }

        let should_close = self
            .window
            .as_ref()
            .is_some_and(|w| w.elapsed_ms() >= self.config.slice_ms);
        if should_close {
            self.close_window()
        } else {
            None
        }
    }

    /// Force-close the partial window; `None` when no frames are pending
    pub fn flush(&mut self) -> Option<NoiseSliceSummary> {
        self.close_window()
    }

    fn close_window(&mut self) -> Option<NoiseSliceSummary> {
        let window = self.window.take()?;
        let stats = summarize(&window.dbfs)?;

        let end = window.last.0;
        let duration_ms = end.saturating_sub(window.start);
        let over_ratio_dbfs = if duration_ms == 0 {
            0.0
        } else {
            (window.over_ms as f64 / duration_ms as f64).clamp(0.0, 1.0)
        };

        let raw = NoiseSliceRawStats {
            avg_dbfs: stats.mean,
            max_dbfs: stats.max,
            p50_dbfs: stats.p50,
            p95_dbfs: stats.p95,
            over_ratio_dbfs,
            segment_count: window.segments.count(),
        };
        let scored = compute_noise_slice_score(&raw, duration_ms, &self.config.score);

        let summary = NoiseSliceSummary {
            start: window.start,
            end,
            frames: u32::try_from(window.dbfs.len()).unwrap_or(u32::MAX),
            raw,
            display: NoiseSliceDisplayStats {
                avg_db: self.calibration.display_db_from_dbfs(stats.mean),
                p95_db: self.calibration.display_db_from_dbfs(stats.p95),
            },
            score: scored.score,
            score_detail: scored.score_detail,
        };

        tracing::debug!(
            "[SliceAggregator] Closed slice {}..{} frames={} score={}",
            summary.start,
            summary.end,
            summary.frames,
            summary.score
        );
        Some(summary)
    }
}
