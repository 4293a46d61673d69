// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::engine::core::{NoiseStreamSnapshot, TelemetryEvent};
use crate::types::NoiseSliceSummary;

/// Snapshot buffer: ~3 s of frames at the default 50 ms tick
const SNAPSHOT_CAPACITY: usize = 64;
const SLICE_CAPACITY: usize = 32;
const TELEMETRY_CAPACITY: usize = 128;

/// Manages all tokio broadcast channels of the stream service
///
/// Single Responsibility: Broadcast channel lifecycle and subscription
///
/// All channels are created up front, so publishing never has to check for
/// initialization and subscribers may attach before capture starts.
///
/// # Channel Types
/// - Snapshots: one `NoiseStreamSnapshot` per processed frame
/// - Slices: each finalized `NoiseSliceSummary`
/// - Telemetry: lifecycle and status events
///
/// Lagging receivers lose the oldest messages (`RecvError::Lagged`); a
/// publish with no receivers is not an error.
pub struct BroadcastChannelManager {
    snapshots: broadcast::Sender<Arc<NoiseStreamSnapshot>>,
    slices: broadcast::Sender<NoiseSliceSummary>,
    telemetry: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastChannelManager {
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CAPACITY);
        let (slices, _) = broadcast::channel(SLICE_CAPACITY);
        let (telemetry, _) = broadcast::channel(TELEMETRY_CAPACITY);
        Self {
            snapshots,
            slices,
            telemetry,
        }
    }

    // ========================================================================
    // SNAPSHOT CHANNEL
    // ========================================================================

    /// Publish a snapshot; returns the number of receivers reached
    pub fn publish_snapshot(&self, snapshot: Arc<NoiseStreamSnapshot>) -> usize {
        self.snapshots.send(snapshot).unwrap_or(0)
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Arc<NoiseStreamSnapshot>> {
        self.snapshots.subscribe()
    }

    // ========================================================================
    // SLICE CHANNEL
    // ========================================================================

    pub fn publish_slice(&self, slice: NoiseSliceSummary) -> usize {
        self.slices.send(slice).unwrap_or(0)
    }

    pub fn subscribe_slices(&self) -> broadcast::Receiver<NoiseSliceSummary> {
        self.slices.subscribe()
    }

    // ========================================================================
    // TELEMETRY CHANNEL
    // ========================================================================

    pub fn publish_telemetry(&self, event: TelemetryEvent) -> usize {
        self.telemetry.send(event).unwrap_or(0)
    }

    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry.subscribe()
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::TelemetryEventKind;

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let manager = BroadcastChannelManager::new();
        let event = TelemetryEvent {
            timestamp_ms: 0,
            kind: TelemetryEventKind::StreamStopped,
            detail: None,
        };
        assert_eq!(manager.publish_telemetry(event), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_copies() {
        let manager = BroadcastChannelManager::new();
        let mut first = manager.subscribe_telemetry();
        let mut second = manager.subscribe_telemetry();

        let reached = manager.publish_telemetry(TelemetryEvent {
            timestamp_ms: 5,
            kind: TelemetryEventKind::Restarted,
            detail: Some("settings".to_string()),
        });
        assert_eq!(reached, 2);

        assert_eq!(first.recv().await.unwrap().timestamp_ms, 5);
        assert_eq!(second.recv().await.unwrap().timestamp_ms, 5);
    }
}
