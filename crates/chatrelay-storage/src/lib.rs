//! ChatRelay Storage - file-per-conversation persistence
//!
//! One directory per user, one JSON file per conversation session:
//!
//! ```text
//! <root>/<user_id>/<session_id>.json
//! ```
//!
//! There is no locking: a session is expected to be driven by one active
//! client at a time, so same-session concurrent appends are unsupported.
//! Distinct sessions and users are fully independent.

mod store;

pub use store::ConversationStore;
