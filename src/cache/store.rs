use super::config::QueryOptions;
use super::entry::{FetchStatus, QueryEntry, QuerySnapshot, QueryStatus};
use super::key::QueryKey;
use super::subscription::SubscriptionManager;
use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Keyed cache of query entries. All mutations happen under one write lock,
/// so readers always observe complete, consistent entries. Subscribers are
/// notified after the lock is released; ordering is enforced by the
/// subscription manager's monotonic delivery gate.
pub struct QueryStore {
    entries: RwLock<HashMap<String, QueryEntry>>,
    pub subscriptions: Arc<SubscriptionManager>,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
        }
    }

    /// Create the entry for `key` if it does not exist yet.
    pub async fn ensure_entry(&self, key: &QueryKey, options: &QueryOptions) {
        let canonical = key.canonical();
        let mut entries = self.entries.write().await;
        entries.entry(canonical).or_insert_with(|| {
            QueryEntry::new(options.stale_duration, options.retention_duration)
        });
    }

    pub async fn get(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let entries = self.entries.read().await;
        entries.get(&key.canonical()).map(QueryEntry::snapshot)
    }

    pub async fn is_fresh(&self, key: &QueryKey, now: Instant) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(&key.canonical())
            .is_some_and(|entry| entry.is_fresh(now))
    }

    /// Apply a pure transformation to the entry's data without a network
    /// round trip (optimistic local edit). Bumps the update timestamp and
    /// re-arms the freshness window, then notifies subscribers.
    pub async fn upsert(
        &self,
        key: &QueryKey,
        mutator: impl FnOnce(Option<Value>) -> Option<Value>,
    ) {
        let canonical = key.canonical();
        let now = Instant::now();
        let snapshot = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&canonical) else {
                return;
            };

            entry.data = mutator(entry.data.take());
            entry.last_updated_at = Some(now);
            entry.stale_at = Some(now + entry.stale_duration);
            if entry.data.is_some() {
                entry.status = QueryStatus::Success;
                entry.error = None;
            } else if entry.status == QueryStatus::Success {
                entry.status = QueryStatus::Pending;
            }
            entry.snapshot()
        };

        debug!("✏️  Cache EDIT: {canonical}");
        self.subscriptions.notify(&canonical, &snapshot).await;
    }

    /// Force the entry stale so the next access or trigger refetches it.
    pub async fn invalidate(&self, key: &QueryKey) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key.canonical()) {
            entry.stale_at = Some(Instant::now());
        }
    }

    pub async fn mark_fetching(&self, key: &QueryKey) {
        let canonical = key.canonical();
        let snapshot = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&canonical) else {
                return;
            };
            entry.fetch_status = FetchStatus::Fetching;
            entry.snapshot()
        };
        self.subscriptions.notify(&canonical, &snapshot).await;
    }

    pub async fn mark_paused(&self, key: &QueryKey) {
        let canonical = key.canonical();
        let snapshot = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&canonical) else {
                return;
            };
            entry.fetch_status = FetchStatus::Paused;
            entry.snapshot()
        };
        self.subscriptions.notify(&canonical, &snapshot).await;
    }

    /// Commit a successful fetch result. Rejected when the entry has been
    /// garbage-collected mid-flight or when a fetch with a later start
    /// generation already committed. Returns whether the commit applied.
    pub async fn commit_success(&self, key: &QueryKey, data: Value, generation: u64) -> bool {
        let canonical = key.canonical();
        let now = Instant::now();
        let snapshot = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&canonical) else {
                debug!("🗑️  Cache DROP RESULT (entry gone): {canonical}");
                return false;
            };
            if generation <= entry.committed_generation {
                debug!("🗑️  Cache DROP RESULT (superseded): {canonical}");
                return false;
            }
            entry.apply_success(data, generation, now);
            entry.snapshot()
        };

        debug!("💾 Cache STORE: {canonical}");
        self.subscriptions.notify(&canonical, &snapshot).await;
        true
    }

    /// Commit a terminal fetch failure (retry budget exhausted or a
    /// non-retryable error). Same generation gating as `commit_success`.
    pub async fn commit_error(&self, key: &QueryKey, error: Error, generation: u64) -> bool {
        let canonical = key.canonical();
        let now = Instant::now();
        let snapshot = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&canonical) else {
                return false;
            };
            if generation <= entry.committed_generation {
                return false;
            }
            entry.apply_error(error, generation, now);
            entry.snapshot()
        };

        debug!("❌ Cache ERROR: {canonical}");
        self.subscriptions.notify(&canonical, &snapshot).await;
        true
    }

    /// Register an observer: creates the entry on first observation and
    /// cancels any running retention countdown.
    pub async fn observer_added(&self, key: &QueryKey, options: &QueryOptions) -> u32 {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.canonical()).or_insert_with(|| {
            QueryEntry::new(options.stale_duration, options.retention_duration)
        });
        entry.observer_count += 1;
        entry.retain_until = None;
        entry.observer_count
    }

    /// Drop an observer; when the count reaches zero the retention window
    /// starts ticking. Returns the remaining observer count.
    pub async fn observer_removed(&self, key: &QueryKey) -> u32 {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(&key.canonical()) else {
            return 0;
        };
        entry.observer_count = entry.observer_count.saturating_sub(1);
        if entry.observer_count == 0 {
            entry.retain_until = Some(Instant::now() + entry.retention_duration);
        }
        entry.observer_count
    }

    /// Remove every entry that is unobserved past its retention window.
    /// Returns the canonical keys that were evicted so callers can drop
    /// their per-key runtime state.
    pub async fn evict_expired(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.remove(key);
            debug!("🗑️  Cache EVICT: {key}");
        }
        expired
    }

    /// Canonical keys that are observed and stale: the refetch set for
    /// focus-regain and reconnect triggers.
    pub async fn stale_observed_keys(&self, now: Instant) -> Vec<String> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(_, entry)| entry.observer_count > 0 && entry.is_stale(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let now = Instant::now();

        CacheStats {
            total_entries: entries.len(),
            fresh_entries: entries.values().filter(|e| e.is_fresh(now)).count(),
            stale_entries: entries.values().filter(|e| e.is_stale(now)).count(),
            error_entries: entries
                .values()
                .filter(|e| e.status == QueryStatus::Error)
                .count(),
            observed_entries: entries.values().filter(|e| e.observer_count > 0).count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub error_entries: usize,
    pub observed_entries: usize,
}
