//! Realtime chart buffer bounded by both age and capacity.

use std::collections::VecDeque;

use crate::types::NoiseRealtimePoint;

/// Circular buffer of `{t, value}` points for live charting
///
/// Every push evicts points older than `retention_ms` relative to the pushed
/// point, then trims the oldest entries until the length fits `capacity`.
/// Eviction only ever pops from the front, so each point is removed at most
/// once (amortized O(1) per push). Points are never mutated after insertion.
#[derive(Debug, Clone)]
pub struct RealtimeRingBuffer {
    retention_ms: u64,
    capacity: usize,
    points: VecDeque<NoiseRealtimePoint>,
}

impl RealtimeRingBuffer {
    pub fn new(retention_ms: u64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            retention_ms,
            capacity,
            points: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    pub fn push(&mut self, point: NoiseRealtimePoint) {
        let now = point.t;
        self.points.push_back(point);

        while let Some(front) = self.points.front() {
            if now.saturating_sub(front.t) > self.retention_ms {
                self.points.pop_front();
            } else {
                break;
            }
        }

        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    /// Independent copy of the buffered points, oldest first
    pub fn snapshot(&self) -> Vec<NoiseRealtimePoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<NoiseRealtimePoint> {
        self.points.back().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(t: u64, value: f64) -> NoiseRealtimePoint {
        NoiseRealtimePoint { t, value }
    }

    #[test]
    fn test_evicts_by_age() {
        let mut ring = RealtimeRingBuffer::new(1_000, 100);
        for t in (0..=3_000).step_by(100) {
            ring.push(point(t, t as f64));
        }

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.first().map(|p| p.t), Some(2_000));
        assert_eq!(snapshot.last().map(|p| p.t), Some(3_000));
        assert!(snapshot.iter().all(|p| 3_000 - p.t <= 1_000));
    }

    #[test]
    fn test_evicts_by_capacity() {
        let mut ring = RealtimeRingBuffer::new(60_000, 10);
        for t in 0..25 {
            ring.push(point(t, 0.0));
        }

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot[0].t, 15);
        assert_eq!(snapshot[9].t, 24);
    }

    #[test]
    fn test_snapshots_are_independent_copies() {
        let mut ring = RealtimeRingBuffer::new(1_000, 10);
        ring.push(point(0, 1.0));
        let first = ring.snapshot();
        ring.push(point(10, 2.0));
        let second = ring.snapshot();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(ring.latest(), Some(point(10, 2.0)));
    }

    #[test]
    fn test_point_exactly_at_retention_edge_is_kept() {
        let mut ring = RealtimeRingBuffer::new(500, 10);
        ring.push(point(0, 0.0));
        ring.push(point(500, 0.0));
        assert_eq!(ring.len(), 2);
        ring.push(point(501, 0.0));
        assert_eq!(ring.len(), 2);
    }
}
