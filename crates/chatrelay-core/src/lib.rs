//! ChatRelay Core - the streaming chat orchestration pipeline
//!
//! Drives one send-message lifecycle: billing pre-authorization, history
//! load, upstream streaming invocation, incremental relay, persistence and
//! billing settlement, with rollback on partial failure. Collaborators are
//! injected behind traits so the pipeline is testable against fakes.

mod notify;
mod orchestrator;
mod sweep;

pub use notify::Notifier;
pub use orchestrator::{ChatCompletion, ChatError, ChatOrchestrator, SendMessageRequest};
pub use sweep::spawn_retention_sweep;
