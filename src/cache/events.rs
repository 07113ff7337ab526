/**
 * Lifecycle event bridge
 *
 * Translates host-environment events (window focus, network connectivity)
 * into coordinator refetch triggers. The host pushes events into a channel;
 * a processor task applies them, so integrations never call the coordinator
 * from their own event loops directly.
 */
use super::config::EVENT_CHANNEL_CAPACITY;
use super::coordinator::FetchCoordinator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// An external lifecycle transition relevant to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    FocusGained,
    FocusLost,
    ConnectionRestored,
    ConnectionLost,
}

/// Feeds [`LifecycleEvent`]s into a [`FetchCoordinator`].
pub struct EventBridge {
    coordinator: Arc<FetchCoordinator>,
}

impl EventBridge {
    #[must_use]
    pub fn new(coordinator: Arc<FetchCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Start the processor task. Returns the sender half for host
    /// integrations and a handle that aborts the processor when shut down.
    #[must_use]
    pub fn start(self) -> (mpsc::Sender<LifecycleEvent>, EventBridgeHandle) {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let coordinator = self.coordinator;

        let task = tokio::spawn(async move {
            info!("📡 Lifecycle event processor started");
            while let Some(event) = event_rx.recv().await {
                debug!("📡 EVENT: {event:?}");
                match event {
                    LifecycleEvent::FocusGained => coordinator.set_focused(true).await,
                    LifecycleEvent::FocusLost => coordinator.set_focused(false).await,
                    LifecycleEvent::ConnectionRestored => coordinator.set_online(true).await,
                    LifecycleEvent::ConnectionLost => coordinator.set_online(false).await,
                }
            }
            info!("📡 Lifecycle event processor shutting down");
        });

        (event_tx, EventBridgeHandle { task })
    }
}

/// Handle to the running event processor.
pub struct EventBridgeHandle {
    task: JoinHandle<()>,
}

impl EventBridgeHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::QueryOptions;
    use crate::cache::coordinator::fetch_fn;
    use crate::cache::key::QueryKey;
    use crate::cache::store::QueryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_focus_gained_revalidates_observed_stale_query() {
        let coordinator = FetchCoordinator::new(Arc::new(QueryStore::new()));
        let key = QueryKey::root("posts").push(1i64);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        coordinator
            .register(
                &key,
                fetch_fn(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!(["a"]))
                    }
                }),
                QueryOptions::default().stale_for(Duration::from_secs(10)),
            )
            .await;

        let handle = coordinator.watch(&key, Arc::new(|_| {})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (events, bridge) = EventBridge::new(coordinator.clone()).start();

        // Still fresh: focus regain must not hit the network.
        events.send(LifecycleEvent::FocusGained).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Past the freshness window: focus regain refetches.
        tokio::time::advance(Duration::from_secs(11)).await;
        events.send(LifecycleEvent::FocusGained).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        coordinator.unwatch(handle).await;
        bridge.shutdown();
    }
}
