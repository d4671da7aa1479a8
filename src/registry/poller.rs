use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{PeerPresenceRegistry, PresenceSnapshot};

/// Drives a registry on a fixed interval for as long as its owner lives.
pub struct PresencePoller {
    registry: Arc<PeerPresenceRegistry>,
    handle: Option<JoinHandle<()>>,
}

impl PresencePoller {
    /// Refreshes right away, then once per `every`. Must be called inside a
    /// tokio runtime.
    pub fn spawn(registry: Arc<PeerPresenceRegistry>, every: Duration) -> Self {
        let task_registry = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // A slow backend delays the schedule rather than bunching polls
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if task_registry.is_closed() {
                    break;
                }
                task_registry.refresh().await;
            }
        });

        tracing::debug!(interval = ?every, "presence polling started");
        Self {
            registry,
            handle: Some(handle),
        }
    }

    pub fn registry(&self) -> &Arc<PeerPresenceRegistry> {
        &self.registry
    }

    /// Every snapshot published after this call. The stream ends once the
    /// registry is closed, even while other owners keep it alive.
    pub fn updates(&self) -> impl Stream<Item = Arc<PresenceSnapshot>> {
        let registry = Arc::clone(&self.registry);
        let mut receiver = registry.subscribe();
        async_stream::stream! {
            while !registry.is_closed() && receiver.changed().await.is_ok() {
                if registry.is_closed() {
                    break;
                }
                let snapshot = receiver.borrow_and_update().clone();
                yield snapshot;
            }
        }
    }

    /// Stops polling. Takes effect immediately: the timer task is aborted
    /// and a refresh still in flight has its result discarded.
    pub fn shutdown(&mut self) {
        self.registry.close();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("presence polling stopped");
        }
    }
}

impl Drop for PresencePoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
