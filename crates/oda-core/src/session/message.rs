//! Conversation message types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Represents the role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the on-device model.
    Assistant,
}

/// Lifecycle of a message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Final content.
    Complete,
    /// Assistant reply still receiving increments.
    Streaming,
    /// Generation was cancelled; content is whatever arrived before.
    Cancelled,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    /// Never earlier than the entry before it in the log.
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into(), MessageStatus::Complete)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into(), MessageStatus::Complete)
    }

    /// An empty assistant reply that will grow while streaming.
    pub fn pending_assistant() -> Self {
        Self::new(MessageRole::Assistant, String::new(), MessageStatus::Streaming)
    }

    fn new(role: MessageRole, content: String, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            created_at: Utc::now(),
            status,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == MessageStatus::Cancelled
    }
}
