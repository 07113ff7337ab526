use super::config::DEFAULT_REQUEST_TIMEOUT_SECS;
use super::key::QueryKey;
use super::store::QueryStore;
use crate::error::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// The write path. Mutations are never cached by key and never retried;
/// failures surface directly to the caller, who owns any rollback of
/// optimistic state. After a successful write the caller can patch affected
/// cache entries through [`MutationExecutor::reconcile`] instead of forcing
/// a full refetch.
pub struct MutationExecutor {
    store: Arc<QueryStore>,
    request_timeout: Duration,
}

impl MutationExecutor {
    #[must_use]
    pub fn new(store: Arc<QueryStore>) -> Self {
        Self {
            store,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub const fn timeout_after(mut self, duration: Duration) -> Self {
        self.request_timeout = duration;
        self
    }

    /// Run the write operation under the configured timeout and return its
    /// tagged result.
    pub async fn execute<T, Fut>(&self, op: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match timeout(self.request_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(Error::Network(format!(
                "mutation timed out after {:?}",
                self.request_timeout
            ))),
        }
    }

    /// Patch a cached entry with the locally-known effect of a completed
    /// write (e.g. drop the deleted item from the active page).
    pub async fn reconcile(
        &self,
        key: &QueryKey,
        mutator: impl FnOnce(Option<Value>) -> Option<Value>,
    ) {
        debug!("🩹 RECONCILE: {key}");
        self.store.upsert(key, mutator).await;
    }
}
