use super::config::{GC_SWEEP_INTERVAL_SECONDS, INFLIGHT_CHANNEL_CAPACITY, QueryOptions};
use super::entry::QuerySnapshot;
use super::key::QueryKey;
use super::store::QueryStore;
use super::subscription::SubscriptionCallback;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

/// Source of data for one query. The coordinator owns when and how often
/// this runs; implementations only perform the request.
#[async_trait]
pub trait QueryFetch: Send + Sync {
    async fn fetch(&self) -> Result<Value>;
}

struct FnFetch<F>(F);

#[async_trait]
impl<F, Fut> QueryFetch for FnFetch<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn fetch(&self) -> Result<Value> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`QueryFetch`] implementation.
pub fn fetch_fn<F, Fut>(f: F) -> Arc<dyn QueryFetch>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnFetch(f))
}

type FetchOutcome = Result<Value>;

struct Inflight {
    generation: u64,
    tx: broadcast::Sender<FetchOutcome>,
}

struct QueryRuntime {
    key: QueryKey,
    fetcher: Arc<dyn QueryFetch>,
    options: QueryOptions,
    /// Generations are handed out at fetch start; the store rejects commits
    /// from generations older than the newest committed one.
    next_generation: u64,
    inflight: Option<Inflight>,
    poll_task: Option<JoinHandle<()>>,
}

/// Handle returned by [`FetchCoordinator::watch`]; pass it back to
/// [`FetchCoordinator::unwatch`] to release the observer.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: String,
    key: QueryKey,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// Drives all fetching for a [`QueryStore`]: request deduplication, retry
/// with exponential backoff, freshness policy, offline pausing, refetch
/// triggers (focus, reconnect, mount, interval) and garbage collection.
pub struct FetchCoordinator {
    store: Arc<QueryStore>,
    queries: RwLock<HashMap<String, QueryRuntime>>,
    online: AtomicBool,
    focused: AtomicBool,
    online_notify: Notify,
}

impl FetchCoordinator {
    #[must_use]
    pub fn new(store: Arc<QueryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            queries: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            focused: AtomicBool::new(true),
            online_notify: Notify::new(),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<QueryStore> {
        &self.store
    }

    /// Spawn the garbage-collection sweep loop. Returns the shutdown sender.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> mpsc::Sender<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let coordinator = self.clone();

        tokio::spawn(async move {
            info!(
                "🚀 Cache GC loop started (sweep every {}s)",
                GC_SWEEP_INTERVAL_SECONDS
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("🛑 Cache GC loop shutting down");
                        break;
                    }
                    () = sleep(Duration::from_secs(GC_SWEEP_INTERVAL_SECONDS)) => {
                        coordinator.store.evict_expired(Instant::now()).await;
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Register (or replace) the fetcher and policy for a query key. A live
    /// in-flight operation and the generation counter are preserved.
    pub async fn register(
        &self,
        key: &QueryKey,
        fetcher: Arc<dyn QueryFetch>,
        options: QueryOptions,
    ) {
        let canonical = key.canonical();
        let mut queries = self.queries.write().await;
        match queries.get_mut(&canonical) {
            Some(runtime) => {
                runtime.fetcher = fetcher;
                runtime.options = options;
            }
            None => {
                debug!("📝 REGISTER: {canonical}");
                queries.insert(
                    canonical,
                    QueryRuntime {
                        key: key.clone(),
                        fetcher,
                        options,
                        next_generation: 0,
                        inflight: None,
                        poll_task: None,
                    },
                );
            }
        }
    }

    /// Resolve the query: a fresh entry is served from cache with no network
    /// call; otherwise join-or-start a fetch and await its outcome.
    pub async fn fetch(self: &Arc<Self>, key: &QueryKey) -> Result<Value> {
        let now = Instant::now();
        if self.store.is_fresh(key, now).await {
            if let Some(data) = self.store.get(key).await.and_then(|snap| snap.data) {
                debug!("🎯 Cache HIT: {key}");
                return Ok(data);
            }
        }
        self.refetch(key).await
    }

    /// Unconditionally go to the network (joining an in-flight operation if
    /// one exists) and await the result.
    pub async fn refetch(self: &Arc<Self>, key: &QueryKey) -> Result<Value> {
        let mut rx = self.begin_fetch(key).await?;
        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Custom(format!("fetch for {key} was abandoned"))),
        }
    }

    /// Stale-while-revalidate accessor: returns the current snapshot
    /// immediately. A stale or absent entry additionally kicks off a
    /// background fetch; a fresh one does not.
    pub async fn access(self: &Arc<Self>, key: &QueryKey) -> Result<QuerySnapshot> {
        let now = Instant::now();
        match self.store.get(key).await {
            Some(snapshot) if self.store.is_fresh(key, now).await => {
                debug!("🎯 Cache HIT: {key}");
                Ok(snapshot)
            }
            Some(snapshot) => {
                debug!("🔄 Cache STALE: {key}, revalidating in background");
                let _ = self.begin_fetch(key).await?;
                Ok(snapshot)
            }
            None => {
                debug!("❌ Cache MISS: {key}");
                let _ = self.begin_fetch(key).await?;
                self.store
                    .get(key)
                    .await
                    .ok_or_else(|| Error::Custom(format!("no entry for {key}")))
            }
        }
    }

    /// Mark the entry stale so the next access or trigger refetches it.
    pub async fn invalidate(&self, key: &QueryKey) {
        self.store.invalidate(key).await;
    }

    /// Subscribe to a query. Increments the observer count, arms the
    /// poll interval on first observation, and applies the mount trigger:
    /// a stale or empty entry is refetched, a fresh one is served as is.
    pub async fn watch(
        self: &Arc<Self>,
        key: &QueryKey,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionHandle> {
        let options = {
            let queries = self.queries.read().await;
            queries
                .get(&key.canonical())
                .map(|runtime| runtime.options.clone())
                .ok_or_else(|| Error::Custom(format!("query not registered: {key}")))?
        };

        let observers = self.store.observer_added(key, &options).await;
        let id = self
            .store
            .subscriptions
            .subscribe(&key.canonical(), callback)
            .await;

        if observers == 1 {
            self.start_poll_task(key).await;
        }

        if !self.store.is_fresh(key, Instant::now()).await {
            let _ = self.begin_fetch(key).await;
        }

        Ok(SubscriptionHandle {
            id,
            key: key.clone(),
        })
    }

    /// Release an observer. When the last one leaves, the poll interval
    /// stops and the entry's retention countdown starts.
    pub async fn unwatch(&self, handle: SubscriptionHandle) {
        self.store.subscriptions.unsubscribe(&handle.id).await;
        let remaining = self.store.observer_removed(&handle.key).await;
        if remaining == 0 {
            self.stop_poll_task(&handle.key).await;
        }
    }

    /// Foreground/background transition. Regaining focus refetches every
    /// observed stale query; fresh ones stay served from cache.
    pub async fn set_focused(self: &Arc<Self>, focused: bool) {
        self.focused.store(focused, Ordering::Release);
        if focused {
            info!("🔆 FOCUS REGAINED: revalidating stale queries");
            self.refetch_stale_observed().await;
        }
    }

    /// Connectivity transition. Going offline pauses future fetch attempts;
    /// coming back online resumes paused fetches and refetches observed
    /// stale queries.
    pub async fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            info!("🔌 CONNECTIVITY RESTORED: resuming fetches");
            self.online_notify.notify_waiters();
            self.refetch_stale_observed().await;
        } else if !online && was_online {
            warn!("🔌 CONNECTIVITY LOST: fetches will pause");
        }
    }

    async fn refetch_stale_observed(self: &Arc<Self>) {
        let stale = self.store.stale_observed_keys(Instant::now()).await;
        let keys: Vec<QueryKey> = {
            let queries = self.queries.read().await;
            stale
                .iter()
                .filter_map(|canonical| queries.get(canonical).map(|rt| rt.key.clone()))
                .collect()
        };
        for key in keys {
            let _ = self.begin_fetch(&key).await;
        }
    }

    /// Join-or-start: attach to the in-flight operation for this key if one
    /// exists, otherwise assign a generation, spawn the fetch task and
    /// return a receiver for its outcome. The single place that enforces
    /// at-most-one in-flight fetch per key.
    async fn begin_fetch(self: &Arc<Self>, key: &QueryKey) -> Result<broadcast::Receiver<FetchOutcome>> {
        let canonical = key.canonical();
        let (generation, tx, fetcher, options) = {
            let mut queries = self.queries.write().await;
            let runtime = queries
                .get_mut(&canonical)
                .ok_or_else(|| Error::Custom(format!("query not registered: {key}")))?;

            if let Some(inflight) = &runtime.inflight {
                debug!("🔗 ATTACH: {canonical} (in-flight fetch exists)");
                return Ok(inflight.tx.subscribe());
            }

            runtime.next_generation += 1;
            let generation = runtime.next_generation;
            let (tx, _) = broadcast::channel(INFLIGHT_CHANNEL_CAPACITY);
            runtime.inflight = Some(Inflight {
                generation,
                tx: tx.clone(),
            });
            (
                generation,
                tx,
                runtime.fetcher.clone(),
                runtime.options.clone(),
            )
        };

        self.store.ensure_entry(key, &options).await;

        let rx = tx.subscribe();
        let coordinator = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            coordinator
                .run_fetch(key, canonical, generation, fetcher, options, tx)
                .await;
        });

        Ok(rx)
    }

    async fn run_fetch(
        self: Arc<Self>,
        key: QueryKey,
        canonical: String,
        generation: u64,
        fetcher: Arc<dyn QueryFetch>,
        options: QueryOptions,
        tx: broadcast::Sender<FetchOutcome>,
    ) {
        let started = Instant::now();
        info!("🔄 FETCH START: {canonical} (generation {generation})");
        self.store.mark_fetching(&key).await;

        let outcome = self.run_attempts(&key, &canonical, &fetcher, &options).await;
        let elapsed = started.elapsed();

        match &outcome {
            Ok(data) => {
                info!("✅ FETCH SUCCESS: {canonical} ({:.2}s)", elapsed.as_secs_f64());
                self.store
                    .commit_success(&key, data.clone(), generation)
                    .await;
            }
            Err(err) => {
                error!(
                    "❌ FETCH FAILED: {canonical} ({:.2}s) - {err}",
                    elapsed.as_secs_f64()
                );
                self.store.commit_error(&key, err.clone(), generation).await;
            }
        }

        // Free the in-flight slot, unless a superseding fetch replaced it.
        {
            let mut queries = self.queries.write().await;
            if let Some(runtime) = queries.get_mut(&canonical) {
                if runtime
                    .inflight
                    .as_ref()
                    .is_some_and(|inflight| inflight.generation == generation)
                {
                    runtime.inflight = None;
                }
            }
        }

        // Waiters attached to this operation get its own outcome even when
        // the commit was rejected (entry evicted or superseded).
        let _ = tx.send(outcome);
    }

    async fn run_attempts(
        &self,
        key: &QueryKey,
        canonical: &str,
        fetcher: &Arc<dyn QueryFetch>,
        options: &QueryOptions,
    ) -> FetchOutcome {
        let mut attempt: u32 = 0;
        loop {
            self.wait_until_online(key, canonical).await;

            let result = match timeout(options.request_timeout, fetcher.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Network(format!(
                    "request timed out after {:?}",
                    options.request_timeout
                ))),
            };

            match result {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() && attempt < options.retry.max_retries => {
                    let delay = options.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "🔄 FETCH RETRY: {canonical} in {}s (retry {}/{}) - {err}",
                        delay.as_secs(),
                        attempt,
                        options.retry.max_retries
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Park the fetch while offline; resumed by `set_online(true)`.
    async fn wait_until_online(&self, key: &QueryKey, canonical: &str) {
        let mut paused = false;
        loop {
            if self.online.load(Ordering::Acquire) {
                break;
            }
            if !paused {
                warn!("⏸️  FETCH PAUSED (offline): {canonical}");
                self.store.mark_paused(key).await;
                paused = true;
            }
            // Register with the notifier before re-checking the flag, so a
            // reconnect between the check and the await cannot be missed.
            let notified = self.online_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.online.load(Ordering::Acquire) {
                break;
            }
            notified.await;
        }
        if paused {
            self.store.mark_fetching(key).await;
        }
    }

    async fn start_poll_task(self: &Arc<Self>, key: &QueryKey) {
        let canonical = key.canonical();
        let mut queries = self.queries.write().await;
        let Some(runtime) = queries.get_mut(&canonical) else {
            return;
        };
        let Some(interval) = runtime.options.refetch_interval else {
            return;
        };
        if runtime.poll_task.is_some() {
            return;
        }

        let in_background = runtime.options.refetch_in_background;
        let coordinator = self.clone();
        let poll_key = key.clone();
        debug!("⏰ POLL START: {canonical} every {}s", interval.as_secs());

        runtime.poll_task = Some(tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if in_background || coordinator.focused.load(Ordering::Acquire) {
                    // Unconditional: the interval ignores freshness.
                    let _ = coordinator.begin_fetch(&poll_key).await;
                }
            }
        }));
    }

    async fn stop_poll_task(&self, key: &QueryKey) {
        let mut queries = self.queries.write().await;
        if let Some(runtime) = queries.get_mut(&key.canonical()) {
            if let Some(task) = runtime.poll_task.take() {
                debug!("⏰ POLL STOP: {key}");
                task.abort();
            }
        }
    }
}
