// crates/core/src/error.rs
//! Error types shared across the provider client and its callers.

use thiserror::Error;

/// Errors from a provider call (either wire family).
///
/// The `retryable` split drives both retry layers: the client's own
/// exponential connect backoff and the batch pipeline's fixed-delay
/// per-item retry. The two policies are intentionally separate — batch
/// items need bounded, predictable latency while interactive calls can
/// tolerate longer waits.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401/403 from the upstream — the credential is wrong, retrying is pointless.
    #[error("invalid credentials (HTTP {status})")]
    InvalidCredential { status: u16 },

    /// 429 from the upstream.
    #[error("rate limited by provider")]
    RateLimited,

    /// 4xx other than 401/403/429 — the request itself is malformed.
    #[error("provider rejected request (HTTP {status}): {body}")]
    InvalidRequest { status: u16, body: String },

    /// 5xx from the upstream.
    #[error("provider error (HTTP {status}): {body}")]
    Upstream { status: u16, body: String },

    /// Connect/read failure below HTTP.
    #[error("network error: {0}")]
    Network(String),

    #[error("provider call timed out")]
    Timeout,

    /// The response arrived but could not be decoded into the normalized shape.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// The caller's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Classify an HTTP error status per the taxonomy above.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::InvalidCredential { status },
            429 => Self::RateLimited,
            400..=499 => Self::InvalidRequest { status, body },
            _ => Self::Upstream { status, body },
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Upstream { .. } | Self::Network(_) | Self::Timeout
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, String::new()),
            ProviderError::InvalidCredential { status: 401 }
        ));
        assert!(matches!(
            ProviderError::from_status(403, String::new()),
            ProviderError::InvalidCredential { status: 403 }
        ));
        assert!(matches!(
            ProviderError::from_status(429, String::new()),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            ProviderError::from_status(400, String::new()),
            ProviderError::InvalidRequest { status: 400, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(503, String::new()),
            ProviderError::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn test_retryable_split() {
        assert!(ProviderError::RateLimited.retryable());
        assert!(ProviderError::Upstream { status: 500, body: String::new() }.retryable());
        assert!(ProviderError::Network("reset".into()).retryable());
        assert!(ProviderError::Timeout.retryable());

        assert!(!ProviderError::InvalidCredential { status: 401 }.retryable());
        assert!(!ProviderError::InvalidRequest { status: 400, body: String::new() }.retryable());
        assert!(!ProviderError::Parse("bad json".into()).retryable());
        assert!(!ProviderError::Cancelled.retryable());
    }
}
