use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::{lock_recover, NoiseStreamService, NoiseStreamSnapshot, ServiceInner};
use crate::error::{log_capture_error, CaptureError};
use crate::types::NoiseStreamStatus;

/// Live snapshot feed; capture keeps running while any subscription is alive
///
/// Dropping the subscription unsubscribes. When the last one goes away the
/// capture pipeline stops after the service's debounce delay, unless a new
/// subscriber arrives first.
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<NoiseStreamSnapshot>>,
    lease: SubscriberLease,
}

impl Subscription {
    /// Next snapshot; skips over snapshots missed while lagging
    ///
    /// Returns `None` only if the service has been dropped.
    pub async fn recv(&mut self) -> Option<Arc<NoiseStreamSnapshot>> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("[Subscription] Lagged, skipped {} snapshots", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream`, keeping the subscription alive with it
    pub fn into_stream(self) -> impl Stream<Item = Arc<NoiseStreamSnapshot>> + Send + 'static {
        let lease = self.lease;
        BroadcastStream::new(self.receiver).filter_map(move |item| {
            let _held = &lease;
            futures::future::ready(item.ok())
        })
    }

    pub fn unsubscribe(self) {}
}

/// Counts one subscriber for as long as it lives
struct SubscriberLease {
    inner: Arc<ServiceInner>,
}

impl Drop for SubscriberLease {
    fn drop(&mut self) {
        self.inner.release_subscriber();
    }
}

impl NoiseStreamService {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    /// Subscribe to snapshots, starting capture for the first subscriber
    ///
    /// Must be called within a tokio runtime; otherwise the status becomes
    /// `error` and no capture is started.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.broadcasts.subscribe_snapshots();

        let first = {
            let mut subscribers = lock_recover(&self.inner.subscribers);
            if let Some(timer) = subscribers.stop_timer.take() {
                timer.abort();
                tracing::debug!("[StreamService] Pending stop cancelled by new subscriber");
            }
            subscribers.count += 1;
            subscribers.count == 1
        };

        if first {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let inner = Arc::clone(&self.inner);
                    handle.spawn(async move {
                        inner.start_if_subscribed().await;
                    });
                }
                Err(err) => {
                    let err = CaptureError::StreamFailure {
                        reason: format!("no tokio runtime to start capture: {}", err),
                    };
                    log_capture_error(&err, "NoiseStreamService::subscribe");
                    self.inner
                        .set_status(NoiseStreamStatus::Error, Some(err.to_string()));
                }
            }
        }

        Subscription {
            receiver,
            lease: SubscriberLease {
                inner: Arc::clone(&self.inner),
            },
        }
    }
}

impl ServiceInner {
    pub(super) fn release_subscriber(self: &Arc<Self>) {
        let mut subscribers = lock_recover(&self.subscribers);
        subscribers.count = subscribers.count.saturating_sub(1);
        if subscribers.count > 0 {
            return;
        }

        if let Some(timer) = subscribers.stop_timer.take() {
            timer.abort();
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("[StreamService] Last subscriber left outside a runtime; capture not stopped");
            return;
        };

        let inner = Arc::clone(self);
        let debounce = self.stop_debounce;
        subscribers.stop_timer = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                // Past this point the stop can no longer be cancelled
                let mut subscribers = lock_recover(&inner.subscribers);
                if subscribers.count > 0 {
                    return;
                }
                subscribers.stop_timer = None;
            }
            inner.stop_if_idle().await;
        }));
    }
}
