//! Transient stream events produced during one send-message lifecycle.
//!
//! Events are produced by the upstream client and the orchestrator and
//! consumed exactly once by the transport layer. They are never persisted.

use serde::{Deserialize, Serialize};

/// Token usage counters reported by the upstream provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Stable machine-readable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    BillingDenied,
    BillingError,
    AiError,
}

impl ErrorCode {
    /// Wire-level spelling of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::BillingDenied => "BILLING_DENIED",
            Self::BillingError => "BILLING_ERROR",
            Self::AiError => "AI_ERROR",
        }
    }
}

/// One event in the lazy sequence a send-message call produces.
///
/// A well-formed sequence contains any number of `Status` and `TextDelta`
/// events followed by exactly one terminal event, `Done` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        message: String,
        /// Coarse progress indication, 0-100.
        progress: u8,
    },
    TextDelta {
        text: String,
    },
    Done {
        content: String,
        usage: Option<TokenUsage>,
        model: String,
        response_id: Option<String>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl StreamEvent {
    pub fn status(message: impl Into<String>, progress: u8) -> Self {
        Self::Status {
            message: message.into(),
            progress,
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Wire-level event name used by the SSE transport.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::TextDelta { .. } => "text_delta",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
