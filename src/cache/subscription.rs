use super::entry::QuerySnapshot;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Callback invoked with a snapshot on every change to the subscribed entry.
/// Callbacks run inline under the manager lock; keep them lightweight and do
/// not call back into the cache from inside one.
pub type SubscriptionCallback = Arc<dyn Fn(&QuerySnapshot) + Send + Sync>;

struct Subscriber {
    id: String,
    callback: SubscriptionCallback,
}

#[derive(Default)]
struct KeySubscribers {
    subscribers: Vec<Subscriber>,
    /// Timestamp of the newest delivered snapshot. Deliveries that would go
    /// backwards in `last_updated_at` are dropped, so per-key observers see
    /// monotonically non-decreasing update times.
    last_delivered_at: Option<Instant>,
}

/// Keeps the callback lists per canonical cache key. Observer-count
/// bookkeeping lives in the store; this type only routes notifications.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<String, KeySubscribers>>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callback for a canonical key, returning the subscription id.
    pub async fn subscribe(&self, key: &str, callback: SubscriptionCallback) -> String {
        let id = Uuid::new_v4().to_string();
        let mut subs = self.subscriptions.write().await;
        subs.entry(key.to_string())
            .or_default()
            .subscribers
            .push(Subscriber {
                id: id.clone(),
                callback,
            });
        id
    }

    /// Remove a subscription by id. Returns the canonical key it was
    /// attached to, if it was still registered.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Option<String> {
        let mut subs = self.subscriptions.write().await;
        let mut found = None;

        for (key, entry) in subs.iter_mut() {
            let before = entry.subscribers.len();
            entry.subscribers.retain(|s| s.id != subscription_id);
            if entry.subscribers.len() < before {
                found = Some(key.clone());
                break;
            }
        }

        // Clean up empty entries
        subs.retain(|_, entry| !entry.subscribers.is_empty());
        found
    }

    /// Deliver a snapshot to every subscriber of `key`, synchronously.
    /// Out-of-order snapshots (older `last_updated_at` than the newest
    /// already delivered for this key) are dropped.
    pub async fn notify(&self, key: &str, snapshot: &QuerySnapshot) {
        let mut subs = self.subscriptions.write().await;
        let Some(entry) = subs.get_mut(key) else {
            return;
        };

        if let (Some(delivered), Some(updated)) = (entry.last_delivered_at, snapshot.last_updated_at)
        {
            if updated < delivered {
                return;
            }
        }
        if snapshot.last_updated_at.is_some() {
            entry.last_delivered_at = snapshot.last_updated_at;
        }

        for subscriber in &entry.subscribers {
            (subscriber.callback)(snapshot);
        }
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(|entry| entry.subscribers.len()).sum()
    }
}
