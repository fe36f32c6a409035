//! Error types for the upstream client

use thiserror::Error;

/// Upstream provider error types
#[derive(Error, Debug)]
pub enum AiError {
    /// Non-2xx response from the provider.
    #[error("Provider error ({status}): {message}")]
    Provider {
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AiError {
    /// Only rate limiting and network-level failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status, .. } => *status == 429,
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Provider {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, AiError>;
