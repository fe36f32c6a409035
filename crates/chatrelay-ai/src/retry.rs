use std::time::Duration;

use reqwest::Response;

use crate::error::AiError;

/// Backoff settings for upstream completion calls.
#[derive(Debug, Clone)]
pub struct UpstreamRetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for UpstreamRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl UpstreamRetryConfig {
    /// Delay before `attempt` (1-based). The provider's retry hint wins
    /// over the computed backoff.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(seconds) = retry_after_secs {
            return Duration::from_secs(seconds);
        }

        let multiplier = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

pub(crate) fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

pub(crate) async fn response_to_error(response: Response) -> AiError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    AiError::Provider {
        status,
        message: truncate_error_body(body),
        retry_after_secs: retry_after,
    }
}

/// Truncate error bodies to prevent leaking large or sensitive responses.
/// The cut is moved back to a char boundary so multibyte text cannot panic.
pub(crate) fn truncate_error_body(body: String) -> String {
    const MAX_ERROR_BODY: usize = 512;
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression() {
        let config = UpstreamRetryConfig::default();
        assert_eq!(config.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(config.delay_for(2, None), Duration::from_millis(1000));
        assert_eq!(config.delay_for(3, None), Duration::from_millis(2000));
        assert_eq!(config.delay_for(7, None), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let config = UpstreamRetryConfig::default();
        assert_eq!(config.delay_for(3, Some(9)), Duration::from_secs(9));
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let rate_limited = AiError::Provider {
            status: 429,
            message: "slow down".into(),
            retry_after_secs: None,
        };
        let bad_request = AiError::Provider {
            status: 400,
            message: "bad input".into(),
            retry_after_secs: None,
        };
        assert!(rate_limited.is_retryable());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // '€' is three bytes and straddles the 512-byte limit.
        let body = format!("{}€ and more", "a".repeat(510));
        let message = truncate_error_body(body);
        assert_eq!(message, format!("{}... [truncated]", "a".repeat(510)));

        let short = "€".repeat(10);
        assert_eq!(truncate_error_body(short.clone()), short);
    }
}
