use super::*;
use crate::engine::backend::{ScriptedCaptureBackend, TokioClock};
use crate::error::CaptureError;
use crate::storage::MemorySliceStore;

impl NoiseStreamService {
    pub(crate) fn new_test(backend: Arc<ScriptedCaptureBackend>) -> Self {
        Self::with_options(
            backend,
            Arc::new(MemorySliceStore::default()),
            NoiseSettings::default(),
            ServiceOptions {
                clock: Arc::new(TokioClock::new()),
                ..ServiceOptions::default()
            },
        )
    }

    pub(crate) fn pipeline_generation_for_test(&self) -> u64 {
        lock_recover(&self.inner.pipeline).generation
    }

    pub(crate) fn inject_frame_for_test(&self, frame: NoiseFrameSample) {
        let generation = self.pipeline_generation_for_test();
        self.inner.handle_frame(generation, frame);
    }
}

fn frame(t: u64, rms: f64) -> NoiseFrameSample {
    crate::analysis::compute_frame(&[rms as f32, -(rms as f32)], t)
}

#[test]
fn test_refresh_status_threshold_is_strict() {
    let settings = NoiseSettings::default();
    let mut pipeline = PipelineState::new(&settings, &CaptureConfig::default(), 0);

    assert_eq!(pipeline.refresh_status(55.0), None);

    pipeline.average_display_db = Some(55.0);
    assert_eq!(pipeline.refresh_status(55.0), Some(NoiseStreamStatus::Quiet));
    pipeline.average_display_db = Some(55.1);
    assert_eq!(pipeline.refresh_status(55.0), Some(NoiseStreamStatus::Noisy));
    assert_eq!(pipeline.refresh_status(55.0), None);
}

#[test]
fn test_refresh_status_keeps_failure_states() {
    let settings = NoiseSettings::default();
    let mut pipeline = PipelineState::new(&settings, &CaptureConfig::default(), 0);
    pipeline.status = NoiseStreamStatus::PermissionDenied;
    pipeline.average_display_db = Some(90.0);
    assert_eq!(pipeline.refresh_status(55.0), None);
    assert_eq!(pipeline.status, NoiseStreamStatus::PermissionDenied);
}

#[tokio::test(start_paused = true)]
async fn test_stale_generation_frames_are_dropped() {
    let service = NoiseStreamService::new_test(Arc::new(ScriptedCaptureBackend::new(1e-4)));
    let generation = service.pipeline_generation_for_test();

    service.inner.handle_frame(generation.wrapping_add(7), frame(10, 0.1));
    assert!(service.snapshot().realtime_display_db.is_none());

    service.inject_frame_for_test(frame(10, 1e-4));
    let snapshot = service.snapshot();
    assert!((snapshot.realtime_display_db.unwrap() - 40.0).abs() < 1e-3);
    assert_eq!(snapshot.status, NoiseStreamStatus::Quiet);
    assert_eq!(snapshot.ring_buffer.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_serializes_camel_case() {
    let service = NoiseStreamService::new_test(Arc::new(ScriptedCaptureBackend::new(1e-4)));
    service.inject_frame_for_test(frame(50, 1e-4));

    let value = serde_json::to_value(service.snapshot()).unwrap();
    assert_eq!(value["status"], "quiet");
    assert!(value.get("realtimeDisplayDb").is_some());
    assert!(value.get("ringBuffer").is_some());
    assert_eq!(value["maxLevelDb"], 55.0);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_maps_to_error_status() {
    let backend = Arc::new(ScriptedCaptureBackend::new(1e-4));
    backend.set_failure(Some(CaptureError::DeviceUnavailable {
        details: "busy".to_string(),
    }));
    let service = NoiseStreamService::new_test(Arc::clone(&backend));
    let mut telemetry = service.subscribe_telemetry();

    let _sub = service.subscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(service.status(), NoiseStreamStatus::Error);
    assert!(!service.is_capturing().await);
    let event = telemetry.recv().await.unwrap();
    assert_eq!(
        event.kind,
        TelemetryEventKind::StatusChanged {
            status: NoiseStreamStatus::Error
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_patch_is_rejected_and_settings_kept() {
    let service = NoiseStreamService::new_test(Arc::new(ScriptedCaptureBackend::new(1e-4)));
    let result = service
        .update_settings(SettingsPatch {
            slice_sec: Some(-1.0),
            ..SettingsPatch::default()
        })
        .await;
    assert!(matches!(result, Err(ConfigError::Invalid { field: "slice_sec", .. })));
    assert_eq!(service.settings(), NoiseSettings::default());
}

#[tokio::test(start_paused = true)]
async fn test_calibrate_without_frames_fails() {
    let service = NoiseStreamService::new_test(Arc::new(ScriptedCaptureBackend::new(1e-4)));
    assert!(service.calibrate_baseline(35.0).await.is_err());
}
