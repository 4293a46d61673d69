//! Slice history persistence.
//!
//! A [`SliceStore`] keeps finalized slices for a rolling retention window
//! (24 h by default). Records are append-only: the only ways a slice leaves
//! the store are retention trimming and an explicit clear. Every change is
//! announced on a broadcast channel so history views can refresh without
//! polling.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StorageError;
use crate::types::NoiseSliceSummary;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlSliceStore;
pub use memory::MemorySliceStore;

/// Default history retention
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Slices scoring below this count toward noisy time
pub const NOISY_SCORE_THRESHOLD: u8 = 60;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Result of appending one slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Slices held after the write
    pub retained: usize,
    /// Slices evicted by retention during the write
    pub trimmed: usize,
}

/// Change notification emitted by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SliceStoreEvent {
    Appended { end: u64 },
    Trimmed { removed: usize },
    Cleared,
}

/// Persistence collaborator of the stream service
pub trait SliceStore: Send + Sync {
    /// Append a slice, trim to the retention window, notify subscribers
    fn write_slice(&self, slice: &NoiseSliceSummary) -> Result<WriteOutcome, StorageError>;

    /// Retained slices in write order
    fn read_slices(&self) -> Result<Vec<NoiseSliceSummary>, StorageError>;

    fn clear_slices(&self) -> Result<(), StorageError>;

    fn subscribe_changes(&self) -> broadcast::Receiver<SliceStoreEvent>;
}

/// Retention rule shared by the store implementations
///
/// Age is measured against the newest slice's `end`, so history recorded
/// with any clock is trimmed consistently. Stores are append-ordered, so
/// only the front of the history is ever inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    retention_ms: u64,
}

impl RetentionWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention_ms: retention.as_millis() as u64,
        }
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Drop the oldest slices ending more than the window before `newest_end`;
    /// returns how many were removed
    pub fn trim(&self, history: &mut VecDeque<NoiseSliceSummary>, newest_end: u64) -> usize {
        let mut removed = 0;
        while let Some(front) = history.front() {
            if newest_end.saturating_sub(front.end) > self.retention_ms {
                history.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

pub(crate) fn change_channel() -> broadcast::Sender<SliceStoreEvent> {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

/// Aggregate view over a slice history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub slice_count: usize,
    pub average_score: f64,
    /// Lowest-scoring slice (earliest on ties)
    pub worst: NoiseSliceSummary,
    /// Total duration of slices scoring below [`NOISY_SCORE_THRESHOLD`]
    pub noisy_minutes: f64,
}

/// Summarize a history; `None` when it is empty
pub fn summarize_history(slices: &[NoiseSliceSummary]) -> Option<HistorySummary> {
    let worst = slices.iter().min_by_key(|s| s.score)?;

    let total: u64 = slices.iter().map(|s| u64::from(s.score)).sum();
    let noisy_ms: u64 = slices
        .iter()
        .filter(|s| s.score < NOISY_SCORE_THRESHOLD)
        .map(NoiseSliceSummary::duration_ms)
        .sum();

    Some(HistorySummary {
        slice_count: slices.len(),
        average_score: total as f64 / slices.len() as f64,
        worst: worst.clone(),
        noisy_minutes: noisy_ms as f64 / 60_000.0,
    })
}
