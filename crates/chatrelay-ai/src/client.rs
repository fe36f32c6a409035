//! Upstream client trait and input types

use std::pin::Pin;

use chatrelay_models::{MessageRole, StreamEvent};
use futures::Stream;
use serde::Serialize;

/// Finite, single-consumption sequence of stream events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// One turn of model input.
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Input to a streaming completion: either the accumulated history, or a
/// single new message resuming server-side context from a prior turn.
/// Both strategies produce equivalent conversational behavior.
#[derive(Debug, Clone)]
pub enum UpstreamInput {
    History(Vec<PromptMessage>),
    Resume { message: String, resume_id: String },
}

/// Streaming completion provider, behind a trait so the orchestrator can
/// be exercised against fakes.
pub trait UpstreamClient: Send + Sync {
    /// Open a streaming completion. The returned sequence contains any
    /// number of `Status` and `TextDelta` events followed by exactly one
    /// terminal event (`Done` or `Error`).
    fn stream_completion(&self, input: UpstreamInput) -> EventStream;
}
