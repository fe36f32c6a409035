//! Error types for the billing client

use thiserror::Error;

/// Billing client error types
#[derive(Error, Debug)]
pub enum BillingError {
    /// Non-2xx response from the billing service.
    #[error("Billing service error ({status}): {message}")]
    Api {
        status: u16,
        /// Provider error code, when the body carried one.
        code: Option<String>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BillingError {
    /// 5xx and network-level failures are retried; 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500,
            Self::Http(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
        }
    }
}

/// Result type alias for billing operations
pub type Result<T> = std::result::Result<T, BillingError>;
