//! Conversation models for chat persistence.

use serde::{Deserialize, Serialize};

/// Title given to a conversation before the first user message arrives.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Maximum number of characters kept when deriving a title from the first
/// user message.
const TITLE_MAX_CHARS: usize = 30;

/// Role of a chat message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    /// Included in model input but never shown to the end user.
    System,
}

/// Inline attachment carried on a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: String,
    pub filename: String,
    /// Inline data reference (base64 payload or URL).
    pub data: String,
}

/// Single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Upstream provider response identifier; lets the next turn resume
    /// from server-side context instead of resending full history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            attachments: None,
            response_id: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        if !attachments.is_empty() {
            self.attachments = Some(attachments);
        }
        self
    }

    pub fn with_response_id(mut self, response_id: Option<String>) -> Self {
        self.response_id = response_id;
        self
    }
}

/// Persisted conversation: one user, one session, an append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            metadata: None,
        }
    }

    /// Append a message, deriving the title from the first user message if
    /// it is still the default. Messages are never reordered or edited.
    pub fn add_message(&mut self, message: Message) {
        if self.title == DEFAULT_TITLE && message.role == MessageRole::User {
            self.title = derive_title(&message.content);
        }
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.messages.push(message);
    }

    /// Response identifier of the most recent assistant turn, if any.
    pub fn last_response_id(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .and_then(|m| m.response_id.as_deref())
    }
}

/// Listing view of a conversation, without the message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conv: &Conversation) -> Self {
        Self {
            session_id: conv.session_id.clone(),
            title: conv.title.clone(),
            message_count: conv.messages.len(),
            created_at: conv.created_at,
            updated_at: conv.updated_at,
        }
    }
}

fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else if head.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_conversation_defaults() {
        let conv = Conversation::new("user-1", "session-1");
        assert_eq!(conv.title, DEFAULT_TITLE);
        assert!(conv.messages.is_empty());
        assert_eq!(conv.created_at, conv.updated_at);
    }

    #[test]
    fn test_title_from_first_user_message() {
        let mut conv = Conversation::new("user-1", "session-1");
        conv.add_message(Message::user("How do I cook rice?"));
        assert_eq!(conv.title, "How do I cook rice?");

        // Title is set once, later messages leave it alone.
        conv.add_message(Message::user("And pasta?"));
        assert_eq!(conv.title, "How do I cook rice?");
    }

    #[test]
    fn test_title_truncated_on_char_boundary() {
        let mut conv = Conversation::new("user-1", "session-1");
        conv.add_message(Message::user("a".repeat(50)));
        assert_eq!(conv.title.chars().count(), 31);
        assert!(conv.title.ends_with('…'));
    }

    #[test]
    fn test_system_message_does_not_set_title() {
        let mut conv = Conversation::new("user-1", "session-1");
        conv.add_message(Message::system("You are a helpful assistant."));
        assert_eq!(conv.title, DEFAULT_TITLE);
    }

    #[test]
    fn test_last_response_id_picks_latest_assistant() {
        let mut conv = Conversation::new("user-1", "session-1");
        conv.add_message(Message::user("hi"));
        conv.add_message(Message::assistant("hello").with_response_id(Some("resp-1".into())));
        conv.add_message(Message::user("more"));
        conv.add_message(Message::assistant("sure").with_response_id(Some("resp-2".into())));
        assert_eq!(conv.last_response_id(), Some("resp-2"));
    }

    #[test]
    fn test_message_order_preserved() {
        let mut conv = Conversation::new("user-1", "session-1");
        for i in 0..5 {
            conv.add_message(Message::user(format!("msg-{i}")));
        }
        let contents: Vec<_> = conv.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }
}
