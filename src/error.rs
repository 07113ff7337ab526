use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the fetch path.
///
/// Variants carry rendered messages rather than source errors so that a
/// failure can live inside a cache entry and be broadcast to every waiter
/// attached to the same in-flight fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Connectivity problem or request timeout. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream returned a non-success status. Retryable only for 5xx.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// Response body did not decode as expected. Not retryable.
    #[error("parse error: {0}")]
    Parse(String),

    /// Custom error message
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Whether the retry/backoff policy applies to this failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Parse(_) | Self::Custom(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Parse(err.to_string());
        }
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}
