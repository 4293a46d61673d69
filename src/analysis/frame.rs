// Frame processor - periodic RMS/peak/dBFS sampling of an analyser node
//
// Each tick reads the analyser's full time-domain buffer once, computes RMS
// and peak in a single pass and emits one NoiseFrameSample. A tick delayed
// by the scheduler simply produces a later timestamp; nothing is buffered
// or backfilled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::backend::{AnalyserNode, TimeSource};
use crate::error::CaptureError;
use crate::types::NoiseFrameSample;

/// Floor applied to RMS before `log10` so silence maps to a finite dBFS
pub const RMS_EPSILON: f64 = 1e-12;

/// Shortest permitted frame interval
pub const MIN_FRAME_INTERVAL_MS: u64 = 10;

/// Convert an RMS amplitude to dBFS, flooring at [`RMS_EPSILON`]
pub fn rms_to_dbfs(rms: f64) -> f64 {
    let rms = if rms.is_finite() { rms } else { 0.0 };
    20.0 * rms.max(RMS_EPSILON).log10()
}

/// Compute one frame sample from a time-domain buffer
///
/// Non-finite input samples count as silence; an empty buffer yields the
/// floored RMS and zero peak.
pub fn compute_frame(samples: &[f32], t: u64) -> NoiseFrameSample {
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f64;
    for &s in samples {
        let v = if s.is_finite() { s as f64 } else { 0.0 };
        sum_sq += v * v;
        peak = peak.max(v.abs());
    }

    let rms = if samples.is_empty() {
        RMS_EPSILON
    } else {
        (sum_sq / samples.len() as f64).sqrt().max(RMS_EPSILON)
    };

    NoiseFrameSample {
        t,
        rms,
        dbfs: rms_to_dbfs(rms),
        peak,
    }
}

/// Emits one [`NoiseFrameSample`] per interval until stopped
///
/// `start` is idempotent (a running processor ignores further starts) and
/// `stop` is safe to call when not running.
pub struct FrameProcessor {
    analyser: Arc<dyn AnalyserNode>,
    clock: Arc<dyn TimeSource>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl FrameProcessor {
    /// Create a processor; the interval is clamped to at least 10 ms
    pub fn new(
        analyser: Arc<dyn AnalyserNode>,
        clock: Arc<dyn TimeSource>,
        interval: Duration,
    ) -> Self {
        Self {
            analyser,
            clock,
            interval: interval.max(Duration::from_millis(MIN_FRAME_INTERVAL_MS)),
            task: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start ticking on the current tokio runtime
    ///
    /// # Errors
    /// `CaptureError::StreamFailure` when called outside a tokio runtime.
    pub fn start<F>(&mut self, mut on_frame: F) -> Result<(), CaptureError>
    where
        F: FnMut(NoiseFrameSample) + Send + 'static,
    {
        if self.is_running() {
            return Ok(());
        }

        let handle =
            tokio::runtime::Handle::try_current().map_err(|err| CaptureError::StreamFailure {
                reason: format!("frame processor needs a tokio runtime: {}", err),
            })?;

        let analyser = Arc::clone(&self.analyser);
        let clock = Arc::clone(&self.clock);
        let period = self.interval;

        self.task = Some(handle.spawn(async move {
            let mut buffer = vec![0.0f32; analyser.fft_size()];
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick of a tokio interval completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                analyser.get_time_domain_data(&mut buffer);
                on_frame(compute_frame(&buffer, clock.now_ms()));
            }
        }));

        tracing::debug!("[FrameProcessor] Started with interval {:?}", period);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("[FrameProcessor] Stopped");
        }
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
