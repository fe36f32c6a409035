//! ChatRelay AI - upstream streaming completion client
//!
//! Opens a streaming request to the language-model provider, decodes its
//! server-sent event framing into the normalized [`StreamEvent`] sequence,
//! and retries transparently on rate limiting and network failures.

mod client;
mod error;
mod http_client;
mod provider;
mod retry;

pub use client::{EventStream, PromptMessage, UpstreamClient, UpstreamInput};
pub use error::{AiError, Result};
pub use provider::HttpUpstreamClient;
pub use retry::UpstreamRetryConfig;

pub use chatrelay_models::StreamEvent;
