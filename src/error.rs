//! Error types for upstream fetching.
//!
//! Rate-limit and transient-server failures are retried inside the fetcher and
//! never propagate on their own; what callers see is the terminal taxonomy:
//! client errors (no retry), network errors on the last attempt, or
//! retries-exhausted naming the URL and the last reason.

use std::fmt;

use thiserror::Error;

/// Why an individual attempt was retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    /// HTTP 429 from the upstream.
    RateLimited,
    /// HTTP 5xx from the upstream.
    ServerError(u16),
    /// Connection-level failure (refused, reset, timeout).
    Network,
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RateLimited => write!(f, "rate limited"),
            RetryReason::ServerError(status) => write!(f, "server error {status}"),
            RetryReason::Network => write!(f, "network error"),
        }
    }
}

/// Errors surfaced by [`crate::fetch::RetryingFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure with no attempts left.
    #[error("network error fetching {url}: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Transport-level detail.
        message: String,
    },

    /// Any non-429 4xx; never retried.
    #[error("client error {status} from {url}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// All attempts consumed without a successful response.
    #[error("failed after {attempts} retries ({last}): {url}")]
    RetriesExhausted {
        /// Request URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Why the final attempt failed.
        last: RetryReason,
    },
}

impl FetchError {
    /// True when a later retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RetriesExhausted { .. }
        )
    }
}

/// A source identifier that does not name any registered agent.
#[derive(Debug, Error)]
#[error("unknown source: {0}")]
pub struct UnknownSource(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_transient() {
        let err = FetchError::Client {
            status: 404,
            url: "http://x".into(),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn exhaustion_names_the_url_and_reason() {
        let err = FetchError::RetriesExhausted {
            url: "https://api.example/data".into(),
            attempts: 3,
            last: RetryReason::RateLimited,
        };
        assert!(err.is_transient());
        let msg = err.to_string();
        assert!(msg.contains("https://api.example/data"));
        assert!(msg.contains("rate limited"));
    }
}
