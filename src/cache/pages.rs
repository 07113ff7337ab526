use super::config::QueryOptions;
use super::coordinator::{FetchCoordinator, fetch_fn};
use super::key::QueryKey;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;

/// Accumulated page sequence held under a single query key. Fetching the
/// next page appends; earlier pages are never discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagedData {
    pub pages: Vec<Value>,
    pub page_params: Vec<Value>,
}

impl PagedData {
    fn parse(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|err| Error::Parse(format!("paged data has unexpected shape: {err}")))
    }

    fn from_cached(data: Option<Value>) -> Self {
        data.and_then(|value| Self::parse(value).ok()).unwrap_or_default()
    }

    fn to_value(&self) -> Value {
        json!({ "pages": self.pages, "page_params": self.page_params })
    }

    #[must_use]
    pub fn last_page(&self) -> Option<&Value> {
        self.pages.last()
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Flatten pages of JSON arrays into one item list, the way an
    /// infinite-scroll consumer renders them.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        self.pages
            .iter()
            .flat_map(|page| page.as_array().cloned().unwrap_or_default())
            .collect()
    }
}

/// Fetches a single page for a given cursor parameter.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch_page(&self, param: &Value) -> Result<Value>;
}

struct FnPageFetch<F>(F);

#[async_trait]
impl<F, Fut> PageFetch for FnPageFetch<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn fetch_page(&self, param: &Value) -> Result<Value> {
        (self.0)(param.clone()).await
    }
}

/// Wrap an async closure as a [`PageFetch`] implementation.
pub fn page_fn<F, Fut>(f: F) -> Arc<dyn PageFetch>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnPageFetch(f))
}

/// Decides the cursor for the page after `last_page`, given every page
/// fetched so far. `None` marks the sequence exhausted.
pub type NextPageParam = Arc<dyn Fn(&Value, &[Value]) -> Option<Value> + Send + Sync>;

/// Cursor-paged query for infinite-scroll consumption. Registers an
/// append-one-page fetcher under the key, so every page fetch goes through
/// the coordinator and inherits its dedup and retry policy: two concurrent
/// next-page requests coalesce into one network call.
pub struct PagedQuery {
    coordinator: Arc<FetchCoordinator>,
    key: QueryKey,
    next_page_param: NextPageParam,
}

impl PagedQuery {
    pub async fn new(
        coordinator: Arc<FetchCoordinator>,
        key: QueryKey,
        page_fetch: Arc<dyn PageFetch>,
        next_page_param: NextPageParam,
        first_page_param: Value,
        options: QueryOptions,
    ) -> Self {
        let store = coordinator.store().clone();
        let fetch_key = key.clone();
        let boundary = next_page_param.clone();

        let fetcher = fetch_fn(move || {
            let store = store.clone();
            let page_fetch = page_fetch.clone();
            let boundary = boundary.clone();
            let key = fetch_key.clone();
            let first = first_page_param.clone();
            async move {
                let mut accumulated =
                    PagedData::from_cached(store.get(&key).await.and_then(|snap| snap.data));

                let param = match accumulated.last_page() {
                    None => Some(first),
                    Some(last) => boundary(last, &accumulated.pages),
                };
                let Some(param) = param else {
                    // Exhausted: nothing to fetch, keep what we have.
                    return Ok(accumulated.to_value());
                };

                let page = page_fetch.fetch_page(&param).await?;
                accumulated.pages.push(page);
                accumulated.page_params.push(param);
                Ok(accumulated.to_value())
            }
        });

        coordinator.register(&key, fetcher, options).await;
        Self {
            coordinator,
            key,
            next_page_param,
        }
    }

    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current accumulated sequence (empty before the first fetch).
    pub async fn current(&self) -> PagedData {
        PagedData::from_cached(
            self.coordinator
                .store()
                .get(&self.key)
                .await
                .and_then(|snap| snap.data),
        )
    }

    /// Whether a next cursor exists. `true` before the first page has been
    /// fetched; afterwards the boundary function decides.
    pub async fn has_next_page(&self) -> bool {
        let current = self.current().await;
        match current.last_page() {
            None => true,
            Some(last) => (self.next_page_param)(last, &current.pages).is_some(),
        }
    }

    /// Load the first page. Once any page has been fetched the accumulated
    /// sequence is returned as is; use [`Self::fetch_next_page`] to extend it.
    pub async fn fetch_first(&self) -> Result<PagedData> {
        let current = self.current().await;
        if current.page_count() > 0 {
            return Ok(current);
        }
        let value = self.coordinator.fetch(&self.key).await?;
        PagedData::parse(value)
    }

    /// Append the next page. A call while the sequence is exhausted returns
    /// the accumulated data without touching the network.
    pub async fn fetch_next_page(&self) -> Result<PagedData> {
        if !self.has_next_page().await {
            return Ok(self.current().await);
        }
        let value = self.coordinator.refetch(&self.key).await?;
        PagedData::parse(value)
    }
}
