/// Above-threshold run tracking state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No segment currently open
    Idle,
    /// A segment is open; `last_above_t` is its most recent above-threshold frame
    Open { last_above_t: u64 },
}

/// Counts gap-merged above-threshold segments with O(1) work per frame
///
/// A segment stays open while above-threshold frames keep arriving within
/// `merge_gap_ms` of each other. Once the gap since the last above-threshold
/// frame exceeds `merge_gap_ms` the segment closes; the next above-threshold
/// frame opens a new one.
#[derive(Debug)]
pub struct SegmentTracker {
    merge_gap_ms: u64,
    state: SegmentState,
    closed: u32,
}

impl SegmentTracker {
    pub fn new(merge_gap_ms: u64) -> Self {
        Self {
            merge_gap_ms,
            state: SegmentState::Idle,
            closed: 0,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Feed one frame in arrival order
    pub fn observe(&mut self, t: u64, above: bool) {
        if let SegmentState::Open { last_above_t } = self.state {
            if t.saturating_sub(last_above_t) > self.merge_gap_ms {
                self.closed = self.closed.saturating_add(1);
                self.state = SegmentState::Idle;
            }
        }

        if above {
            self.state = SegmentState::Open { last_above_t: t };
        }
    }

    /// Closed segments plus the one still open, if any
    pub fn count(&self) -> u32 {
        match self.state {
            SegmentState::Idle => self.closed,
            SegmentState::Open { .. } => self.closed.saturating_add(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_within_gap_merge() {
        let mut tracker = SegmentTracker::new(300);
        for (t, above) in [(0, true), (100, false), (200, true), (450, true), (700, true)] {
            tracker.observe(t, above);
        }
        assert_eq!(tracker.count(), 1);
        assert_eq!(tracker.state(), SegmentState::Open { last_above_t: 700 });
    }

    #[test]
    fn test_gap_beyond_merge_splits() {
        let mut tracker = SegmentTracker::new(300);
        tracker.observe(100, true);
        tracker.observe(200, true);
        tracker.observe(500, false);
        assert_eq!(tracker.count(), 1);
        // 301 ms after the last above frame: segment closes
        tracker.observe(501, false);
        assert_eq!(tracker.state(), SegmentState::Idle);
        assert_eq!(tracker.count(), 1);

        tracker.observe(950, true);
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn test_gap_exactly_at_merge_limit_still_merges() {
        let mut tracker = SegmentTracker::new(300);
        tracker.observe(0, true);
        tracker.observe(300, true);
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_never_above_counts_zero() {
        let mut tracker = SegmentTracker::new(300);
        for t in (0..2_000).step_by(50) {
            tracker.observe(t, false);
        }
        assert_eq!(tracker.count(), 0);
    }
}
