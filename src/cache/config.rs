/**
 * Configuration constants and per-query policy for the cache core
 */
use std::time::Duration;

/// Default freshness window in seconds: data is stale as soon as it lands.
pub const DEFAULT_STALE_SECS: u64 = 0;

/// Default retention window for unobserved entries in seconds (5 minutes)
pub const DEFAULT_RETENTION_SECS: u64 = 300;

/// Default number of retries after the initial failed attempt
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Maximum backoff time in seconds between retry attempts
pub const MAX_BACKOFF_SECONDS: u64 = 30;

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Interval between garbage-collection sweeps in seconds
pub const GC_SWEEP_INTERVAL_SECONDS: u64 = 5;

/// Channel buffer size for lifecycle events
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Broadcast buffer size for in-flight fetch outcomes
pub const INFLIGHT_CHANNEL_CAPACITY: usize = 4;

/// Retry schedule for failed fetch attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; `max_retries + 1` calls total.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRY_LIMIT,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }

    #[must_use]
    pub fn retries(count: u32) -> Self {
        Self {
            max_retries: count,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based): doubles from the
    /// initial backoff, capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Per-query policy. Defaults follow the constants above.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// How long a committed result counts as fresh.
    pub stale_duration: Duration,
    /// How long an unobserved entry is kept before garbage collection.
    pub retention_duration: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Unconditional re-fetch interval while the query is observed.
    pub refetch_interval: Option<Duration>,
    /// Keep the interval running while the process is not focused.
    pub refetch_in_background: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_duration: Duration::from_secs(DEFAULT_STALE_SECS),
            retention_duration: Duration::from_secs(DEFAULT_RETENTION_SECS),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refetch_interval: None,
            refetch_in_background: false,
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn stale_for(mut self, duration: Duration) -> Self {
        self.stale_duration = duration;
        self
    }

    #[must_use]
    pub fn retain_for(mut self, duration: Duration) -> Self {
        self.retention_duration = duration;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn timeout_after(mut self, duration: Duration) -> Self {
        self.request_timeout = duration;
        self
    }

    #[must_use]
    pub fn poll_every(mut self, interval: Duration, in_background: bool) -> Self {
        self.refetch_interval = Some(interval);
        self.refetch_in_background = in_background;
        self
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(MAX_BACKOFF_SECONDS >= INITIAL_BACKOFF_SECONDS);
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(DEFAULT_RETENTION_SECS > 0, "DEFAULT_RETENTION_SECS must be greater than 0");
    assert!(DEFAULT_REQUEST_TIMEOUT_SECS > 0, "DEFAULT_REQUEST_TIMEOUT_SECS must be greater than 0");
    assert!(GC_SWEEP_INTERVAL_SECONDS > 0, "GC_SWEEP_INTERVAL_SECONDS must be greater than 0");
    assert!(EVENT_CHANNEL_CAPACITY > 0, "EVENT_CHANNEL_CAPACITY must be greater than 0");
    assert!(INFLIGHT_CHANNEL_CAPACITY > 0, "INFLIGHT_CHANNEL_CAPACITY must be greater than 0");
};
