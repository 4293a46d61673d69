// End-to-end tests of NoiseStreamService on paused tokio time
//
// Frames tick every 50 ms starting 50 ms after capture opens, so sleeps in
// these tests deliberately end between ticks (e.g. 1020 ms) to keep the
// order of "test wakes" and "frame arrives" deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use noise_monitor::engine::{
    NoiseStreamService, ScriptedCaptureBackend, ServiceOptions, TelemetryEvent,
    TelemetryEventKind, TokioClock,
};
use noise_monitor::error::{CaptureError, StorageError};
use noise_monitor::storage::{MemorySliceStore, SliceStore, SliceStoreEvent, WriteOutcome};
use noise_monitor::{NoiseSettings, NoiseSliceSummary, NoiseStreamStatus, SettingsPatch};
use tokio::sync::broadcast;
use tokio::time::sleep;

const QUIET_AMPLITUDE: f32 = 1e-4;
const LOUD_AMPLITUDE: f32 = 0.1;

fn service_with(
    backend: Arc<ScriptedCaptureBackend>,
    store: Arc<dyn SliceStore>,
    settings: NoiseSettings,
) -> NoiseStreamService {
    NoiseStreamService::with_options(
        backend,
        store,
        settings,
        ServiceOptions {
            clock: Arc::new(TokioClock::new()),
            ..ServiceOptions::default()
        },
    )
}

fn quiet_service() -> (NoiseStreamService, Arc<ScriptedCaptureBackend>, Arc<MemorySliceStore>) {
    let backend = Arc::new(ScriptedCaptureBackend::new(QUIET_AMPLITUDE));
    let store = Arc::new(MemorySliceStore::default());
    let service = service_with(
        Arc::clone(&backend),
        store.clone(),
        NoiseSettings::default(),
    );
    (service, backend, store)
}

fn drain_telemetry(rx: &mut broadcast::Receiver<TelemetryEvent>) -> Vec<TelemetryEventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

/// Store whose writes always fail
struct FailingStore {
    attempts: AtomicUsize,
    changes: broadcast::Sender<SliceStoreEvent>,
}

impl FailingStore {
    fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            changes: broadcast::channel(4).0,
        }
    }
}

impl SliceStore for FailingStore {
    fn write_slice(&self, _slice: &NoiseSliceSummary) -> Result<WriteOutcome, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Io {
            details: "disk full".to_string(),
        })
    }

    fn read_slices(&self) -> Result<Vec<NoiseSliceSummary>, StorageError> {
        Ok(Vec::new())
    }

    fn clear_slices(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<SliceStoreEvent> {
        self.changes.subscribe()
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_frame_moves_initializing_to_quiet() {
    let (service, backend, _store) = quiet_service();
    assert_eq!(service.status(), NoiseStreamStatus::Initializing);

    let mut sub = service.subscribe();
    let first = sub.recv().await.unwrap();
    assert_eq!(first.status, NoiseStreamStatus::Initializing);
    assert!(first.realtime_display_db.is_none());

    let live = sub.recv().await.unwrap();
    assert_eq!(live.status, NoiseStreamStatus::Quiet);
    assert!((live.realtime_display_db.unwrap() - 40.0).abs() < 1e-3);
    assert!((live.realtime_dbfs.unwrap() + 80.0).abs() < 1e-3);
    assert_eq!(live.ring_buffer.len(), 1);
    assert_eq!(live.ring_buffer[0].t, 50);
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_last_unsubscribe_stops_after_debounce() {
    let (service, backend, _store) = quiet_service();

    let sub = service.subscribe();
    sleep(Duration::from_millis(120)).await;
    assert!(service.is_capturing().await);
    assert_eq!(service.subscriber_count(), 1);

    drop(sub);
    assert_eq!(service.subscriber_count(), 0);
    sleep(Duration::from_millis(390)).await;
    assert!(service.is_capturing().await);
    assert_eq!(backend.close_count(), 0);

    sleep(Duration::from_millis(20)).await;
    assert!(!service.is_capturing().await);
    assert_eq!(backend.close_count(), 1);

    let frozen = service.snapshot();
    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(backend.close_count(), 1);
    assert_eq!(backend.open_count(), 1);
    assert_eq!(service.snapshot().ring_buffer, frozen.ring_buffer);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_churn_keeps_single_capture() {
    let (service, backend, _store) = quiet_service();

    let a = service.subscribe();
    drop(a);
    let b = service.subscribe();
    drop(b);
    let _c = service.subscribe();
    sleep(Duration::from_millis(120)).await;

    let d = service.subscribe();
    sleep(Duration::from_millis(200)).await;
    drop(d);
    sleep(Duration::from_millis(1_000)).await;

    assert!(service.is_capturing().await);
    assert_eq!(backend.open_count(), 1);
    assert_eq!(backend.close_count(), 0);
    assert_eq!(backend.max_concurrent_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_within_debounce_cancels_stop() {
    let (service, backend, _store) = quiet_service();

    let sub = service.subscribe();
    sleep(Duration::from_millis(120)).await;
    drop(sub);
    sleep(Duration::from_millis(200)).await;
    let _sub = service.subscribe();
    sleep(Duration::from_millis(1_000)).await;

    assert!(service.is_capturing().await);
    assert_eq!(backend.open_count(), 1);
    assert_eq!(backend.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_then_retry() {
    let (service, backend, _store) = quiet_service();
    backend.set_failure(Some(CaptureError::PermissionDenied));

    let _sub = service.subscribe();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(service.status(), NoiseStreamStatus::PermissionDenied);
    assert!(!service.is_capturing().await);

    // Still denied: retry lands in the same state without opening
    service.retry().await;
    assert_eq!(service.status(), NoiseStreamStatus::PermissionDenied);
    assert_eq!(backend.open_count(), 0);

    backend.set_failure(None);
    service.retry().await;
    sleep(Duration::from_millis(120)).await;
    assert_eq!(service.status(), NoiseStreamStatus::Quiet);
    assert!(service.is_capturing().await);
    assert_eq!(backend.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slices_are_persisted_and_broadcast() {
    let (service, _backend, store) = quiet_service();
    let mut slices = service.subscribe_slices();

    let _sub = service.subscribe();
    sleep(Duration::from_millis(4_220)).await;

    let stored = store.read_slices().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!((stored[0].start, stored[0].end), (50, 2_050));
    assert_eq!((stored[1].start, stored[1].end), (2_100, 4_100));
    assert_eq!(stored[0].frames, 41);
    assert_eq!(stored[0].score, 100);
    assert!(stored[0].raw.p95_dbfs <= stored[0].raw.max_dbfs);

    assert_eq!(slices.try_recv().unwrap(), stored[0]);
    assert_eq!(slices.try_recv().unwrap(), stored[1]);
    assert_eq!(service.snapshot().latest_slice.as_ref(), Some(&stored[1]));
}

#[tokio::test(start_paused = true)]
async fn test_frame_interval_change_restarts_pipeline() {
    let (service, backend, store) = quiet_service();
    let mut telemetry = service.subscribe_telemetry();

    let _sub = service.subscribe();
    sleep(Duration::from_millis(1_020)).await;
    assert!(store.read_slices().unwrap().is_empty());

    service
        .update_settings(SettingsPatch {
            frame_ms: Some(100),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();

    // Partial slice from the old pipeline is flushed, not dropped
    let stored = store.read_slices().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!((stored[0].start, stored[0].end), (50, 1_000));

    assert_eq!(backend.open_count(), 2);
    assert_eq!(backend.close_count(), 1);
    assert_eq!(backend.max_concurrent_sessions(), 1);

    sleep(Duration::from_millis(250)).await;
    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, NoiseStreamStatus::Quiet);
    assert_eq!(snapshot.ring_buffer.len(), 2);

    let kinds = drain_telemetry(&mut telemetry);
    assert!(kinds.contains(&TelemetryEventKind::StreamStopped));
    assert!(kinds.contains(&TelemetryEventKind::Restarted));
    assert!(kinds.contains(&TelemetryEventKind::StreamStarted { frame_ms: 100 }));
}

#[tokio::test(start_paused = true)]
async fn test_max_level_change_applies_in_place() {
    let (service, backend, _store) = quiet_service();
    let mut sub = service.subscribe();
    sleep(Duration::from_millis(520)).await;
    assert_eq!(service.status(), NoiseStreamStatus::Quiet);

    service
        .update_settings(SettingsPatch {
            max_level_db: Some(30.0),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();

    assert_eq!(service.status(), NoiseStreamStatus::Noisy);
    assert_eq!(backend.open_count(), 1);
    assert_eq!(backend.close_count(), 0);

    // The published snapshot carries the new threshold
    let mut latest = None;
    while let Ok(Some(snapshot)) =
        tokio::time::timeout(Duration::from_millis(1), sub.recv()).await
    {
        latest = Some(snapshot);
    }
    let latest = latest.unwrap();
    assert_eq!(latest.max_level_db, 30.0);
    assert_eq!(latest.status, NoiseStreamStatus::Noisy);
}

#[tokio::test(start_paused = true)]
async fn test_partial_slice_flushed_on_stop() {
    let (service, _backend, store) = quiet_service();

    let sub = service.subscribe();
    sleep(Duration::from_millis(1_020)).await;
    drop(sub);

    // Capture keeps ticking until the debounced stop fires at 1_420 ms
    sleep(Duration::from_millis(300)).await;
    assert!(store.read_slices().unwrap().is_empty());
    assert!(service.is_capturing().await);

    sleep(Duration::from_millis(200)).await;
    let stored = store.read_slices().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!((stored[0].start, stored[0].end), (50, 1_400));
    assert_eq!(stored[0].frames, 28);
    assert!(!service.is_capturing().await);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_is_swallowed() {
    let backend = Arc::new(ScriptedCaptureBackend::new(QUIET_AMPLITUDE));
    let store = Arc::new(FailingStore::new());
    let service = service_with(Arc::clone(&backend), store.clone(), NoiseSettings::default());
    let mut telemetry = service.subscribe_telemetry();

    let _sub = service.subscribe();
    sleep(Duration::from_millis(2_120)).await;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(service.status(), NoiseStreamStatus::Quiet);
    assert!(service.is_capturing().await);
    assert_eq!(service.snapshot().latest_slice.map(|s| s.end), Some(2_050));

    let kinds = drain_telemetry(&mut telemetry);
    assert!(kinds.contains(&TelemetryEventKind::PersistFailed));
    assert!(kinds.contains(&TelemetryEventKind::SliceFinalized { score: 100 }));
}

#[tokio::test(start_paused = true)]
async fn test_loud_signal_turns_noisy() {
    let (service, backend, _store) = quiet_service();
    let mut telemetry = service.subscribe_telemetry();

    let _sub = service.subscribe();
    sleep(Duration::from_millis(520)).await;
    assert_eq!(service.status(), NoiseStreamStatus::Quiet);

    backend.set_amplitude(LOUD_AMPLITUDE);
    sleep(Duration::from_millis(3_500)).await;

    let snapshot = service.snapshot();
    assert_eq!(snapshot.status, NoiseStreamStatus::Noisy);
    assert!(snapshot.average_display_db.unwrap() > snapshot.max_level_db);

    let kinds = drain_telemetry(&mut telemetry);
    assert!(kinds.contains(&TelemetryEventKind::StatusChanged {
        status: NoiseStreamStatus::Noisy
    }));
}

#[tokio::test(start_paused = true)]
async fn test_settings_sender_applies_patches_in_order() {
    let (service, _backend, _store) = quiet_service();
    let tx = service.settings_sender();

    tx.send(SettingsPatch {
        max_level_db: Some(70.0),
        ..SettingsPatch::default()
    })
    .await
    .unwrap();
    tx.send(SettingsPatch {
        max_level_db: Some(65.0),
        show_realtime_db: Some(false),
        ..SettingsPatch::default()
    })
    .await
    .unwrap();
    sleep(Duration::from_millis(10)).await;

    let settings = service.settings();
    assert_eq!(settings.max_level_db, 65.0);
    assert!(!settings.show_realtime_db);
    assert!(!service.snapshot().show_realtime_db);
}

#[tokio::test(start_paused = true)]
async fn test_calibrate_baseline_from_recent_frames() {
    let (service, _backend, _store) = quiet_service();
    let _sub = service.subscribe();
    sleep(Duration::from_millis(1_020)).await;

    let calibration = service.calibrate_baseline(35.0).await.unwrap();
    assert!((calibration.baseline_rms - f64::from(QUIET_AMPLITUDE)).abs() < 1e-9);
    assert_eq!(calibration.display_baseline_db, 35.0);
    assert_eq!(service.settings().baseline_db, 35.0);

    sleep(Duration::from_millis(50)).await;
    let snapshot = service.snapshot();
    assert!((snapshot.realtime_display_db.unwrap() - 35.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_restart_without_subscribers_stays_stopped() {
    let (service, backend, _store) = quiet_service();
    let mut telemetry = service.subscribe_telemetry();

    service.restart().await;

    assert!(!service.is_capturing().await);
    assert_eq!(backend.open_count(), 0);
    assert_eq!(drain_telemetry(&mut telemetry), vec![TelemetryEventKind::Restarted]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_share_one_capture() {
    let (service, backend, _store) = quiet_service();

    let stream = service.subscribe().into_stream();
    let mut other = service.subscribe();

    let received: Vec<_> = stream.take(3).collect().await;
    assert_eq!(received.len(), 3);
    assert!(other.recv().await.is_some());
    assert_eq!(backend.open_count(), 1);

    // The stream (and its subscription) is gone; one subscriber remains
    assert_eq!(service.subscriber_count(), 1);
    other.unsubscribe();
    sleep(Duration::from_millis(500)).await;
    assert!(!service.is_capturing().await);
}
