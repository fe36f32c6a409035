//! Conversation store - durable CRUD over per-user conversation files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chatrelay_models::{Conversation, ConversationSummary, Message};
use chrono::{TimeZone, Utc};

/// Durable conversation store keyed by `(user_id, session_id)`.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create store root {}", root.display()))?;
        Ok(Self { root })
    }

    /// Initialize an empty conversation with the default title.
    pub fn create(&self, user_id: &str, session_id: &str) -> Result<Conversation> {
        let conversation = Conversation::new(user_id, session_id);
        self.write(&conversation)?;
        Ok(conversation)
    }

    /// Load a conversation. Absence is `Ok(None)`, not an error.
    pub fn get(&self, user_id: &str, session_id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(user_id, session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let conversation = serde_json::from_str(&data)
            .with_context(|| format!("Corrupt conversation file {}", path.display()))?;
        Ok(Some(conversation))
    }

    /// Append a message, creating the conversation first if absent.
    ///
    /// The first user message also sets the title (if still the default)
    /// and every append bumps `updated_at`.
    pub fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: Message,
    ) -> Result<Conversation> {
        let mut conversation = match self.get(user_id, session_id)? {
            Some(conversation) => conversation,
            None => Conversation::new(user_id, session_id),
        };
        conversation.add_message(message);
        self.write(&conversation)?;
        Ok(conversation)
    }

    /// Response identifier of the most recent assistant turn, if any.
    pub fn last_response_id(&self, user_id: &str, session_id: &str) -> Result<Option<String>> {
        Ok(self
            .get(user_id, session_id)?
            .and_then(|c| c.last_response_id().map(str::to_string)))
    }

    /// Summaries of conversations *created* within the trailing `window`,
    /// newest-updated first. Unreadable files are skipped, not fatal.
    pub fn list_for_user_since(
        &self,
        user_id: &str,
        window: Duration,
    ) -> Result<Vec<ConversationSummary>> {
        let dir = self.user_dir(user_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let cutoff = Utc::now().timestamp_millis() - window.as_millis() as i64;
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let conversation = match read_conversation(&path) {
                Ok(conversation) => conversation,
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "Skipping unreadable conversation");
                    continue;
                }
            };
            if conversation.created_at >= cutoff {
                summaries.push(ConversationSummary::from(&conversation));
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Render the conversation as a human-readable text document.
    pub fn export_text(&self, user_id: &str, session_id: &str) -> Result<Option<String>> {
        let Some(conversation) = self.get(user_id, session_id)? else {
            return Ok(None);
        };

        let mut doc = String::new();
        doc.push_str(&format!("Conversation: {}\n", conversation.title));
        doc.push_str(&format!("Created: {}\n", format_millis(conversation.created_at)));
        for message in &conversation.messages {
            let role = match message.role {
                chatrelay_models::MessageRole::User => "USER",
                chatrelay_models::MessageRole::Assistant => "ASSISTANT",
                chatrelay_models::MessageRole::System => "SYSTEM",
            };
            doc.push_str(&format!(
                "\n[{}] {}\n{}\n",
                role,
                format_millis(message.timestamp),
                message.content
            ));
        }
        Ok(Some(doc))
    }

    /// Delete conversations whose `updated_at` precedes `now - ttl`, across
    /// all users, removing user directories left empty. Returns the number
    /// of conversations deleted. Unreadable files are skipped.
    pub fn retention_sweep(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - ttl.as_millis() as i64;
        let mut deleted = 0usize;

        for user_entry in fs::read_dir(&self.root)? {
            let user_dir = user_entry?.path();
            if !user_dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&user_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let conversation = match read_conversation(&path) {
                    Ok(conversation) => conversation,
                    Err(error) => {
                        tracing::warn!(path = %path.display(), %error, "Skipping unreadable conversation in sweep");
                        continue;
                    }
                };
                if conversation.updated_at < cutoff {
                    fs::remove_file(&path)
                        .with_context(|| format!("Failed to delete {}", path.display()))?;
                    deleted += 1;
                    tracing::debug!(
                        session_id = %conversation.session_id,
                        user_id = %conversation.user_id,
                        "Retention sweep deleted conversation"
                    );
                }
            }
            // Drop the user directory once the last conversation is gone.
            if fs::read_dir(&user_dir)?.next().is_none() {
                let _ = fs::remove_dir(&user_dir);
            }
        }
        Ok(deleted)
    }

    fn write(&self, conversation: &Conversation) -> Result<()> {
        let path = self.conversation_path(&conversation.user_id, &conversation.session_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(conversation)?;
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        validate_id(user_id)?;
        Ok(self.root.join(user_id))
    }

    fn conversation_path(&self, user_id: &str, session_id: &str) -> Result<PathBuf> {
        validate_id(session_id)?;
        Ok(self.user_dir(user_id)?.join(format!("{session_id}.json")))
    }
}

/// Identifiers become path components, so they must not traverse.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        bail!("Invalid identifier: {id:?}");
    }
    Ok(())
}

fn read_conversation(path: &Path) -> Result<Conversation> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
