//! ChatRelay Models - shared data model for the gateway
//!
//! This crate holds the types that cross crate boundaries: persisted
//! conversations and messages, the transient stream event union produced
//! by the orchestrator, and token usage counters.

pub mod conversation;
pub mod event;

pub use conversation::{
    Attachment, Conversation, ConversationSummary, Message, MessageRole, DEFAULT_TITLE,
};
pub use event::{ErrorCode, StreamEvent, TokenUsage};
