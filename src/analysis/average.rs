use std::collections::VecDeque;

/// Duration-weighted moving average over a sliding time window
///
/// Each sample is weighted by the time until the next sample, the newest
/// one by the time until `now`. Irregular frame spacing therefore does not
/// bias the mean toward bursts of closely spaced frames.
#[derive(Debug, Clone)]
pub struct TimeWeightedAverage {
    window_ms: u64,
    samples: VecDeque<(u64, f64)>,
}

impl TimeWeightedAverage {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms: window_ms.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Change the window; samples outside it are dropped on the next push
    pub fn set_window(&mut self, window_ms: u64) {
        self.window_ms = window_ms.max(1);
    }

    pub fn push(&mut self, t: u64, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.samples.push_back((t, value));
        while let Some(&(front_t, _)) = self.samples.front() {
            if t.saturating_sub(front_t) > self.window_ms {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Weighted mean as of `now`; `None` before the first sample
    pub fn value_at(&self, now: u64) -> Option<f64> {
        let mut iter = self.samples.iter().peekable();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        while let Some(&(t, value)) = iter.next() {
            let until = iter.peek().map_or(now, |&&(next_t, _)| next_t);
            let weight = until.saturating_sub(t) as f64;
            weighted += value * weight;
            total_weight += weight;
        }

        if self.samples.is_empty() {
            None
        } else if total_weight > 0.0 {
            Some(weighted / total_weight)
        } else {
            // All samples share one instant
            let sum: f64 = self.samples.iter().map(|&(_, v)| v).sum();
            Some(sum / self.samples.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
