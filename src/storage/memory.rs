use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::StorageError;
use crate::types::NoiseSliceSummary;

use super::{change_channel, RetentionWindow, SliceStore, SliceStoreEvent, WriteOutcome};

/// Volatile slice store, used by tests and when no history path is configured
pub struct MemorySliceStore {
    retention: RetentionWindow,
    history: Mutex<VecDeque<NoiseSliceSummary>>,
    changes: broadcast::Sender<SliceStoreEvent>,
}

impl MemorySliceStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: RetentionWindow::new(retention),
            history: Mutex::new(VecDeque::new()),
            changes: change_channel(),
        }
    }

    fn lock_history(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, VecDeque<NoiseSliceSummary>>, StorageError> {
        self.history.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Default for MemorySliceStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_RETENTION)
    }
}

impl SliceStore for MemorySliceStore {
    fn write_slice(&self, slice: &NoiseSliceSummary) -> Result<WriteOutcome, StorageError> {
        let outcome = {
            let mut history = self.lock_history()?;
            history.push_back(slice.clone());
            let trimmed = self.retention.trim(&mut history, slice.end);
            WriteOutcome {
                retained: history.len(),
                trimmed,
            }
        };

        let _ = self.changes.send(SliceStoreEvent::Appended { end: slice.end });
        if outcome.trimmed > 0 {
            let _ = self.changes.send(SliceStoreEvent::Trimmed {
                removed: outcome.trimmed,
            });
        }
        Ok(outcome)
    }

    fn read_slices(&self) -> Result<Vec<NoiseSliceSummary>, StorageError> {
        Ok(self.lock_history()?.iter().cloned().collect())
    }

    fn clear_slices(&self) -> Result<(), StorageError> {
        self.lock_history()?.clear();
        let _ = self.changes.send(SliceStoreEvent::Cleared);
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SliceStoreEvent> {
        self.changes.subscribe()
    }
}
