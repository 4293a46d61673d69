//! JSON-lines slice history.
//!
//! One serialized [`NoiseSliceSummary`] per line, appended as slices are
//! finalized. Retention trimming only drops entries from memory; the file
//! is rewritten (compacted) once enough stale lines have piled up, on load
//! when stale or corrupt lines were found, on clear, and before the next
//! append after a failed write.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{log_storage_error, StorageError};
use crate::types::NoiseSliceSummary;

use super::{change_channel, RetentionWindow, SliceStore, SliceStoreEvent, WriteOutcome};

/// Compaction never triggers below this many stale lines
const MIN_STALE_LINES_FOR_COMPACTION: usize = 512;

struct JsonlState {
    history: VecDeque<NoiseSliceSummary>,
    /// Lines still in the file whose slices were trimmed from `history`
    stale_lines: usize,
    /// A write failed and may have left a partial line at the end of the file
    torn_tail: bool,
    file: File,
}

/// File-backed slice store using one JSON object per line
pub struct JsonlSliceStore {
    path: PathBuf,
    retention: RetentionWindow,
    state: Mutex<JsonlState>,
    changes: broadcast::Sender<SliceStoreEvent>,
}

impl JsonlSliceStore {
    /// Open (or create) the history file at `path`
    ///
    /// Unparseable lines are skipped with a warning rather than failing the
    /// whole history.
    pub fn open<P: AsRef<Path>>(path: P, retention: Duration) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let retention = RetentionWindow::new(retention);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let (mut history, skipped) = Self::load(&path)?;
        let newest_end = history.iter().map(|s| s.end).max().unwrap_or(0);
        let trimmed = retention.trim(&mut history, newest_end);
        if skipped > 0 || trimmed > 0 {
            log::info!(
                "[SliceStore] Compacting {:?} on load ({} corrupt, {} expired)",
                path,
                skipped,
                trimmed
            );
            Self::rewrite(&path, &history)?;
        }

        let file = Self::open_append(&path)?;
        log::info!(
            "[SliceStore] Opened {:?} with {} retained slices",
            path,
            history.len()
        );

        Ok(Self {
            path,
            retention,
            state: Mutex::new(JsonlState {
                history,
                stale_lines: 0,
                torn_tail: false,
                file,
            }),
            changes: change_channel(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<(VecDeque<NoiseSliceSummary>, usize), StorageError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok((VecDeque::new(), 0))
            }
            Err(err) => return Err(err.into()),
        };

        let mut history = VecDeque::new();
        let mut skipped = 0;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<NoiseSliceSummary>(&line) {
                Ok(slice) => history.push_back(slice),
                Err(err) => {
                    skipped += 1;
                    let err = StorageError::Corrupt {
                        reason: format!("{:?} line {}: {}", path, index + 1, err),
                    };
                    log::warn!("[SliceStore] Skipping record: {}", err);
                }
            }
        }
        Ok((history, skipped))
    }

    fn open_append(path: &Path) -> Result<File, StorageError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Atomically replace the file with exactly `history`
    fn rewrite(path: &Path, history: &VecDeque<NoiseSliceSummary>) -> Result<(), StorageError> {
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for slice in history {
                serde_json::to_writer(&mut writer, slice)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, JsonlState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn compact(&self, state: &mut JsonlState) -> Result<(), StorageError> {
        Self::rewrite(&self.path, &state.history)?;
        state.file = Self::open_append(&self.path)?;
        log::debug!(
            "[SliceStore] Compacted {:?}, dropped {} stale lines",
            self.path,
            state.stale_lines
        );
        state.stale_lines = 0;
        state.torn_tail = false;
        Ok(())
    }
}

fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()
}

impl SliceStore for JsonlSliceStore {
    fn write_slice(&self, slice: &NoiseSliceSummary) -> Result<WriteOutcome, StorageError> {
        let mut line = serde_json::to_vec(slice)?;
        line.push(b'\n');

        let outcome = {
            let mut state = self.lock_state()?;
            if state.torn_tail {
                log::info!("[SliceStore] Rewriting {:?} after a failed append", self.path);
                self.compact(&mut state)?;
            }
            if let Err(err) = append_line(&mut state.file, &line) {
                state.torn_tail = true;
                return Err(err.into());
            }

            state.history.push_back(slice.clone());
            let trimmed = self.retention.trim(&mut state.history, slice.end);
            state.stale_lines += trimmed;

            let threshold = MIN_STALE_LINES_FOR_COMPACTION.max(state.history.len() / 4);
            if state.stale_lines >= threshold {
                // The append already landed; a failed compaction only delays cleanup
                if let Err(err) = self.compact(&mut state) {
                    log_storage_error(&err, "JsonlSliceStore::compact");
                }
            }

            WriteOutcome {
                retained: state.history.len(),
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
        Ok(self.lock_state()?.history.iter().cloned().collect())
    }

    fn clear_slices(&self) -> Result<(), StorageError> {
        {
            let mut state = self.lock_state()?;
            state.history.clear();
            self.compact(&mut state)?;
        }
        let _ = self.changes.send(SliceStoreEvent::Cleared);
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SliceStoreEvent> {
        self.changes.subscribe()
    }
}
