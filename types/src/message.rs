//! Conversation and message domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proofs::MessageContent;

/// Message role. Serialized lowercase to match the wire format clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// A single message in a conversation.
///
/// `timestamp` is optional on the way in; the conversation store stamps it
/// at append time when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    #[must_use]
    pub fn new(role: MessageRole, content: MessageContent) -> Self {
        Self {
            role,
            content,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn user(content: MessageContent) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: MessageContent) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    #[must_use]
    pub fn system(content: MessageContent) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// A conversation: an append-only message log owned by one user inside one
/// context.
///
/// Only `updated_at` ever changes after creation besides the growing
/// message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub context_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
