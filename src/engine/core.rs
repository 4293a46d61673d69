//! NoiseStreamService: orchestration layer of the noise monitor.
//!
//! Owns the capture lifecycle (open, frame tick, teardown), the analysis
//! pipeline state behind a single-writer lock, the quiet/noisy state machine
//! and the broadcast channels consumed by UI, CLI and history views.
//!
//! Status transitions:
//! - `initializing -> quiet|noisy` on the first frame after capture opens
//! - `initializing -> permission-denied|error` when capture setup fails
//! - `quiet <-> noisy` by the time-weighted display-dB average vs `max_level_db`
//!
//! Capture starts with the first subscriber and stops (debounced) after the
//! last one leaves. Start, stop and restart are serialized by one async lock
//! so two capture handles never coexist.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::analysis::{FrameProcessor, RealtimeRingBuffer, SliceAggregator, TimeWeightedAverage};
use crate::calibration::CalibrationState;
use crate::config::{CaptureConfig, NoiseSettings, SettingsPatch};
use crate::engine::backend::{CaptureBackend, CaptureSession, SystemTimeSource, TimeSource};
use crate::error::{log_capture_error, log_storage_error, ConfigError};
use crate::managers::BroadcastChannelManager;
use crate::storage::SliceStore;
use crate::types::{NoiseFrameSample, NoiseRealtimePoint, NoiseSliceSummary, NoiseStreamStatus};

#[path = "core_subscriptions.rs"]
mod core_subscriptions;

pub use core_subscriptions::Subscription;

/// Delay between the last unsubscribe and capture teardown
pub const DEFAULT_STOP_DEBOUNCE: Duration = Duration::from_millis(400);

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Telemetry event emitted by the stream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp_ms: u64,
    pub kind: TelemetryEventKind,
    pub detail: Option<String>,
}

/// Types of telemetry events supported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEventKind {
    StreamStarted { frame_ms: u64 },
    StreamStopped,
    Restarted,
    StatusChanged { status: NoiseStreamStatus },
    SliceFinalized { score: u8 },
    PersistFailed,
}

/// State exposed to UI consumers, published once per processed frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseStreamSnapshot {
    pub status: NoiseStreamStatus,
    /// Display dB of the latest frame
    pub realtime_display_db: Option<f64>,
    pub realtime_dbfs: Option<f64>,
    /// Time-weighted display-dB average driving the quiet/noisy state
    pub average_display_db: Option<f64>,
    pub max_level_db: f64,
    pub show_realtime_db: bool,
    pub alert_sound_enabled: bool,
    pub ring_buffer: Vec<NoiseRealtimePoint>,
    pub latest_slice: Option<NoiseSliceSummary>,
}

/// Construction options beyond the settings themselves
pub struct ServiceOptions {
    pub clock: Arc<dyn TimeSource>,
    pub stop_debounce: Duration,
    pub capture: CaptureConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemTimeSource::default()),
            stop_debounce: DEFAULT_STOP_DEBOUNCE,
            capture: CaptureConfig::default(),
        }
    }
}

/// Pipeline state, written only by the tick callback and lifecycle transitions
struct PipelineState {
    /// Bumped on every start/stop; ticks from an older generation are dropped
    generation: u64,
    status: NoiseStreamStatus,
    aggregator: SliceAggregator,
    average: TimeWeightedAverage,
    /// `(t, rms)` within the averaging window, for baseline calibration
    recent_rms: VecDeque<(u64, f64)>,
    realtime_display_db: Option<f64>,
    realtime_dbfs: Option<f64>,
    average_display_db: Option<f64>,
    latest_slice: Option<NoiseSliceSummary>,
}

struct Lifecycle {
    session: Option<Box<dyn CaptureSession>>,
    processor: Option<FrameProcessor>,
}

struct SubscriberSet {
    count: usize,
    stop_timer: Option<tokio::task::JoinHandle<()>>,
}

pub(crate) struct ServiceInner {
    backend: Arc<dyn CaptureBackend>,
    store: Arc<dyn SliceStore>,
    clock: Arc<dyn TimeSource>,
    capture: CaptureConfig,
    stop_debounce: Duration,
    settings: RwLock<NoiseSettings>,
    pipeline: Mutex<PipelineState>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    subscribers: Mutex<SubscriberSet>,
    broadcasts: BroadcastChannelManager,
    command_tx: mpsc::Sender<SettingsPatch>,
    command_rx: Mutex<Option<mpsc::Receiver<SettingsPatch>>>,
}

/// Noise stream orchestrator; cheap to clone, all clones share one pipeline
#[derive(Clone)]
pub struct NoiseStreamService {
    inner: Arc<ServiceInner>,
}

fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl NoiseStreamService {
    /// Create a service with wall-clock timestamps and default capture options
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        store: Arc<dyn SliceStore>,
        settings: NoiseSettings,
    ) -> Self {
        Self::with_options(backend, store, settings, ServiceOptions::default())
    }

    pub fn with_options(
        backend: Arc<dyn CaptureBackend>,
        store: Arc<dyn SliceStore>,
        settings: NoiseSettings,
        options: ServiceOptions,
    ) -> Self {
        let settings = match settings.validate() {
            Ok(()) => settings,
            Err(err) => {
                log::warn!("[StreamService] Invalid settings ({}), using defaults", err);
                NoiseSettings::default()
            }
        };
        let pipeline = PipelineState::new(&settings, &options.capture, 0);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(ServiceInner {
                backend,
                store,
                clock: options.clock,
                capture: options.capture,
                stop_debounce: options.stop_debounce,
                settings: RwLock::new(settings),
                pipeline: Mutex::new(pipeline),
                lifecycle: tokio::sync::Mutex::new(Lifecycle {
                    session: None,
                    processor: None,
                }),
                subscribers: Mutex::new(SubscriberSet {
                    count: 0,
                    stop_timer: None,
                }),
                broadcasts: BroadcastChannelManager::new(),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
            }),
        }
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn snapshot(&self) -> NoiseStreamSnapshot {
        let settings = self.inner.settings_snapshot();
        let pipeline = lock_recover(&self.inner.pipeline);
        pipeline.snapshot(&settings)
    }

    pub fn status(&self) -> NoiseStreamStatus {
        lock_recover(&self.inner.pipeline).status
    }

    pub fn settings(&self) -> NoiseSettings {
        self.inner.settings_snapshot()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    /// True while a capture session is open
    pub async fn is_capturing(&self) -> bool {
        self.inner.lifecycle.lock().await.session.is_some()
    }

    pub fn store(&self) -> Arc<dyn SliceStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn subscribe_slices(&self) -> broadcast::Receiver<NoiseSliceSummary> {
        self.inner.broadcasts.subscribe_slices()
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.inner.broadcasts.subscribe_telemetry()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Hard-stop, then start again if anyone is subscribed
    ///
    /// The previous capture handle, tick task and ring buffer are released
    /// before new ones are created. Safe to call at any time.
    pub async fn restart(&self) {
        self.inner.restart("restart").await;
    }

    /// Recover from `permission-denied` or `error`
    pub async fn retry(&self) {
        self.inner.restart("retry").await;
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    /// Apply a settings patch
    ///
    /// Thresholds, calibration and averaging window apply in place; frame
    /// interval, slice length and score parameters restart the pipeline.
    ///
    /// # Errors
    /// `ConfigError::Invalid` when the patched settings fail validation; the
    /// current settings stay in effect.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<(), ConfigError> {
        self.inner.update_settings(patch).await
    }

    /// Sender for settings-change notifications, applied in arrival order
    ///
    /// The worker applying them is started on first use and exits when the
    /// service is dropped.
    pub fn settings_sender(&self) -> mpsc::Sender<SettingsPatch> {
        self.init_command_worker();
        self.inner.command_tx.clone()
    }

    fn init_command_worker(&self) {
        let Some(mut command_rx) = lock_recover(&self.inner.command_rx).take() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("[StreamService] Settings worker needs a tokio runtime: {}", err);
                *lock_recover(&self.inner.command_rx) = Some(command_rx);
                return;
            }
        };

        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            while let Some(patch) = command_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = inner.update_settings(patch).await {
                    log::warn!("[StreamService] Rejected settings patch: {}", err);
                }
            }
            log::debug!("[StreamService] Settings worker exited");
        });
    }

    /// Measure a new baseline from the frames inside the averaging window
    ///
    /// The mean RMS of those frames becomes `baseline_rms`, mapped to
    /// `display_db`. Applies in place; persisted history is unchanged.
    ///
    /// # Errors
    /// `ConfigError::Invalid` when no usable frames have been captured.
    pub async fn calibrate_baseline(&self, display_db: f64) -> Result<CalibrationState, ConfigError> {
        let rms: Vec<f64> = {
            let pipeline = lock_recover(&self.inner.pipeline);
            pipeline.recent_rms.iter().map(|&(_, rms)| rms).collect()
        };
        let calibration = CalibrationState::from_rms_samples(&rms, display_db)?;

        self.inner
            .update_settings(SettingsPatch {
                baseline_rms: Some(calibration.baseline_rms),
                baseline_db: Some(calibration.display_baseline_db),
                ..SettingsPatch::default()
            })
            .await?;

        log::info!(
            "[StreamService] Baseline calibrated from {} frames: rms={:.6} -> {} dB",
            rms.len(),
            calibration.baseline_rms,
            calibration.display_baseline_db
        );
        Ok(calibration)
    }
}

impl PipelineState {
    fn new(settings: &NoiseSettings, capture: &CaptureConfig, generation: u64) -> Self {
        let ring = RealtimeRingBuffer::new(
            capture.ring_retention_sec.saturating_mul(1000),
            capture.ring_capacity,
        );
        Self {
            generation,
            status: NoiseStreamStatus::Initializing,
            aggregator: SliceAggregator::new(settings.slice_config(), settings.calibration(), ring),
            average: TimeWeightedAverage::new(settings.avg_window_ms()),
            recent_rms: VecDeque::new(),
            realtime_display_db: None,
            realtime_dbfs: None,
            average_display_db: None,
            latest_slice: None,
        }
    }

    fn snapshot(&self, settings: &NoiseSettings) -> NoiseStreamSnapshot {
        NoiseStreamSnapshot {
            status: self.status,
            realtime_display_db: self.realtime_display_db,
            realtime_dbfs: self.realtime_dbfs,
            average_display_db: self.average_display_db,
            max_level_db: settings.max_level_db,
            show_realtime_db: settings.show_realtime_db,
            alert_sound_enabled: settings.alert_sound_enabled,
            ring_buffer: self.aggregator.ring_buffer().snapshot(),
            latest_slice: self.latest_slice.clone(),
        }
    }

    /// Re-evaluate quiet/noisy; returns the new status when it changed
    fn refresh_status(&mut self, max_level_db: f64) -> Option<NoiseStreamStatus> {
        let average = self.average_display_db?;
        if !matches!(
            self.status,
            NoiseStreamStatus::Initializing | NoiseStreamStatus::Quiet | NoiseStreamStatus::Noisy
        ) {
            return None;
        }

        let next = if average > max_level_db {
            NoiseStreamStatus::Noisy
        } else {
            NoiseStreamStatus::Quiet
        };
        if next == self.status {
            None
        } else {
            self.status = next;
            Some(next)
        }
    }
}

impl ServiceInner {
    fn settings_snapshot(&self) -> NoiseSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn subscriber_count(&self) -> usize {
        lock_recover(&self.subscribers).count
    }

    fn emit_event(&self, kind: TelemetryEventKind, detail: Option<String>) {
        self.broadcasts.publish_telemetry(TelemetryEvent {
            timestamp_ms: self.clock.now_ms(),
            kind,
            detail,
        });
    }

    fn publish_current(&self) {
        let settings = self.settings_snapshot();
        let snapshot = lock_recover(&self.pipeline).snapshot(&settings);
        self.broadcasts.publish_snapshot(Arc::new(snapshot));
    }

    fn set_status(&self, status: NoiseStreamStatus, detail: Option<String>) {
        {
            let mut pipeline = lock_recover(&self.pipeline);
            if pipeline.status == status {
                return;
            }
            pipeline.status = status;
        }
        self.emit_event(TelemetryEventKind::StatusChanged { status }, detail);
    }

    /// Persist and announce a finalized slice; storage failures are logged and swallowed
    fn finalize_slice(&self, slice: NoiseSliceSummary) {
        match self.store.write_slice(&slice) {
            Ok(outcome) => {
                tracing::debug!(
                    "[StreamService] Persisted slice ending {} ({} retained, {} trimmed)",
                    slice.end,
                    outcome.retained,
                    outcome.trimmed
                );
            }
            Err(err) => {
                log_storage_error(&err, "NoiseStreamService::finalize_slice");
                self.emit_event(TelemetryEventKind::PersistFailed, Some(err.to_string()));
            }
        }

        self.emit_event(
            TelemetryEventKind::SliceFinalized { score: slice.score },
            None,
        );
        self.broadcasts.publish_slice(slice);
    }

    /// Tick callback: aggregate, score, update status, publish
    fn handle_frame(&self, generation: u64, frame: NoiseFrameSample) {
        let settings = self.settings_snapshot();
        let avg_window_ms = settings.avg_window_ms();

        let (snapshot, slice, status_change) = {
            let mut pipeline = lock_recover(&self.pipeline);
            if pipeline.generation != generation {
                return;
            }

            let slice = pipeline.aggregator.on_frame(&frame);
            let display_db = pipeline.aggregator.calibration().display_db_from_rms(frame.rms);

            pipeline.average.push(frame.t, display_db);
            pipeline.recent_rms.push_back((frame.t, frame.rms));
            while let Some(&(t, _)) = pipeline.recent_rms.front() {
                if frame.t.saturating_sub(t) > avg_window_ms {
                    pipeline.recent_rms.pop_front();
                } else {
                    break;
                }
            }

            pipeline.realtime_display_db = Some(display_db);
            pipeline.realtime_dbfs = Some(if frame.dbfs.is_finite() {
                frame.dbfs
            } else {
                crate::analysis::rms_to_dbfs(frame.rms)
            });
            pipeline.average_display_db = pipeline.average.value_at(frame.t);
            let status_change = pipeline.refresh_status(settings.max_level_db);

            if let Some(slice) = &slice {
                pipeline.latest_slice = Some(slice.clone());
            }
            (pipeline.snapshot(&settings), slice, status_change)
        };

        if let Some(slice) = slice {
            self.finalize_slice(slice);
        }
        if let Some(status) = status_change {
            self.emit_event(TelemetryEventKind::StatusChanged { status }, None);
        }
        self.broadcasts.publish_snapshot(Arc::new(snapshot));
    }

    /// Open capture and start ticking; no-op when already running
    async fn start_locked(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.session.is_some() {
            return;
        }

        let settings = self.settings_snapshot();
        let generation = {
            let mut pipeline = lock_recover(&self.pipeline);
            let generation = pipeline.generation.wrapping_add(1);
            *pipeline = PipelineState::new(&settings, &self.capture, generation);
            generation
        };
        self.publish_current();

        let session = match self.backend.open().await {
            Ok(session) => session,
            Err(err) => {
                log_capture_error(&err, "NoiseStreamService::start");
                let status = if err.is_permission_denied() {
                    NoiseStreamStatus::PermissionDenied
                } else {
                    NoiseStreamStatus::Error
                };
                self.set_status(status, Some(err.to_string()));
                self.publish_current();
                return;
            }
        };

        let mut processor = FrameProcessor::new(
            session.analyser(),
            Arc::clone(&self.clock),
            settings.frame_interval(),
        );
        let weak = Arc::downgrade(self);
        let started = processor.start(move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_frame(generation, frame);
            }
        });

        if let Err(err) = started {
            log_capture_error(&err, "NoiseStreamService::start");
            session.close().await;
            self.set_status(NoiseStreamStatus::Error, Some(err.to_string()));
            self.publish_current();
            return;
        }

        let frame_ms = processor.interval().as_millis() as u64;
        lifecycle.session = Some(session);
        lifecycle.processor = Some(processor);
        log::info!("[StreamService] Capture started, frame interval {} ms", frame_ms);
        self.emit_event(TelemetryEventKind::StreamStarted { frame_ms }, None);
    }

    /// Stop ticking, flush the partial slice and release capture
    async fn hard_stop_locked(&self, lifecycle: &mut Lifecycle) {
        if let Some(mut processor) = lifecycle.processor.take() {
            processor.stop();
        }

        let flushed = {
            let mut pipeline = lock_recover(&self.pipeline);
            pipeline.generation = pipeline.generation.wrapping_add(1);
            let flushed = pipeline.aggregator.flush();
            if let Some(slice) = &flushed {
                pipeline.latest_slice = Some(slice.clone());
            }
            flushed
        };
        if let Some(slice) = flushed {
            self.finalize_slice(slice);
        }

        if let Some(session) = lifecycle.session.take() {
            session.close().await;
            log::info!("[StreamService] Capture stopped");
            self.emit_event(TelemetryEventKind::StreamStopped, None);
        }
    }

    async fn restart(self: &Arc<Self>, reason: &str) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.hard_stop_locked(&mut lifecycle).await;
        self.emit_event(TelemetryEventKind::Restarted, Some(reason.to_string()));
        if self.subscriber_count() > 0 {
            self.start_locked(&mut lifecycle).await;
        }
    }

    /// Start on behalf of a subscriber, unless everyone left in the meantime
    async fn start_if_subscribed(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.subscriber_count() > 0 {
            self.start_locked(&mut lifecycle).await;
        }
    }

    /// Debounced-stop target: tear down only if still unsubscribed
    async fn stop_if_idle(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.subscriber_count() == 0 {
            self.hard_stop_locked(&mut lifecycle).await;
        }
    }

    async fn update_settings(self: &Arc<Self>, patch: SettingsPatch) -> Result<(), ConfigError> {
        let (previous, next) = {
            let mut settings = match self.settings.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let next = settings.patched(&patch);
            next.validate()?;
            let previous = std::mem::replace(&mut *settings, next.clone());
            (previous, next)
        };

        if previous.requires_restart(&next) {
            log::info!("[StreamService] Sampling settings changed, restarting pipeline");
            self.restart("settings").await;
            return Ok(());
        }

        let status_change = {
            let mut pipeline = lock_recover(&self.pipeline);
            pipeline.aggregator.set_calibration(next.calibration());
            pipeline.average.set_window(next.avg_window_ms());
            pipeline.refresh_status(next.max_level_db)
        };
        if let Some(status) = status_change {
            self.emit_event(TelemetryEventKind::StatusChanged { status }, Some("settings".to_string()));
        }
        self.publish_current();
        Ok(())
    }
}

#[cfg(test)]
mod tests;
