use crate::error::Error;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Result state of a query: has it ever produced data or a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Success,
    Error,
}

/// Network activity state, orthogonal to [`QueryStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
    /// A fetch is wanted but the coordinator is offline.
    Paused,
}

/// A single cached query. Owned exclusively by the store; everything the
/// outside world sees is a [`QuerySnapshot`].
#[derive(Debug, Clone)]
pub struct QueryEntry {
    pub data: Option<Value>,
    pub error: Option<Error>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub last_updated_at: Option<Instant>,
    pub stale_at: Option<Instant>,
    /// Set while unobserved; cleared the moment an observer arrives.
    pub retain_until: Option<Instant>,
    pub observer_count: u32,
    /// Highest fetch generation whose result has been applied. Commits from
    /// older generations are rejected so completion order can never override
    /// request start order.
    pub committed_generation: u64,
    pub stale_duration: Duration,
    pub retention_duration: Duration,
}

impl QueryEntry {
    #[must_use]
    pub fn new(stale_duration: Duration, retention_duration: Duration) -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            last_updated_at: None,
            stale_at: None,
            // Armed from birth so entries that are fetched but never
            // observed still age out; cleared on first observation.
            retain_until: Some(Instant::now() + retention_duration),
            observer_count: 0,
            committed_generation: 0,
            stale_duration,
            retention_duration,
        }
    }

    /// Fresh means there is data and its freshness window has not elapsed.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.data.is_some() && self.stale_at.is_some_and(|at| now < at)
    }

    #[must_use]
    pub fn is_stale(&self, now: Instant) -> bool {
        self.data.is_some() && !self.is_fresh(now)
    }

    /// Removal rule: unobserved and past the retention window.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.observer_count == 0 && self.retain_until.is_some_and(|until| now > until)
    }

    pub fn apply_success(&mut self, data: Value, generation: u64, now: Instant) {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.fetch_status = FetchStatus::Idle;
        self.last_updated_at = Some(now);
        self.stale_at = Some(now + self.stale_duration);
        self.committed_generation = generation;
    }

    pub fn apply_error(&mut self, error: Error, generation: u64, now: Instant) {
        self.error = Some(error);
        self.status = QueryStatus::Error;
        self.fetch_status = FetchStatus::Idle;
        self.last_updated_at = Some(now);
        self.committed_generation = generation;
    }

    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot {
        QuerySnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            fetch_status: self.fetch_status,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Consistent point-in-time view of an entry, handed to readers and
/// subscription callbacks.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub data: Option<Value>,
    pub error: Option<Error>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub last_updated_at: Option<Instant>,
}

impl QuerySnapshot {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }
}
