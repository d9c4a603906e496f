//! Conversation storage with user isolation.
//!
//! Conversations are append-only message logs. Every access path carries the
//! caller's `user_id` and enforces ownership at the data layer, so a leaked
//! conversation id on its own grants nothing.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::StoreError;
use flowdeck_types::{Conversation, Message};

/// Conversation log contract.
pub trait ConversationStore {
    /// Create a new empty conversation for a user in a context.
    async fn create(&self, context_id: &str, user_id: &str) -> Result<Conversation, StoreError>;

    /// Fetch a conversation by id. Returns `None` when the conversation does
    /// not exist *or* the user does not own it — existence is never leaked.
    async fn get(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// The most recently updated conversation in a context, if any.
    async fn latest_for_context(
        &self,
        context_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Append a message with atomic authorization.
    ///
    /// The ownership check and the append happen as one atomic update: the
    /// operation either fully succeeds (returning the updated conversation)
    /// or fails with [`StoreError::ConversationDenied`]. Two concurrent
    /// appends to the same conversation serialize; neither is lost.
    ///
    /// Messages without a timestamp are stamped at append time.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
        user_id: &str,
    ) -> Result<Conversation, StoreError>;
}

/// Process-local [`ConversationStore`].
///
/// One mutex guards the whole map, which makes `append_message` the same
/// check-and-update atom a backing document store provides with a filtered
/// `findOneAndUpdate`.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConversationStore for InMemoryConversationStore {
    async fn create(&self, context_id: &str, user_id: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            context_id: context_id.to_string(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.lock()
            .insert(conversation.id.clone(), conversation.clone());
        tracing::debug!(conversation_id = %conversation.id, context_id, "created conversation");
        Ok(conversation)
    }

    async fn get(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .lock()
            .get(conversation_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn latest_for_context(
        &self,
        context_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .lock()
            .values()
            .filter(|c| c.context_id == context_id && c.user_id == user_id)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        mut message: Message,
        user_id: &str,
    ) -> Result<Conversation, StoreError> {
        let mut conversations = self.lock();
        let conversation = conversations
            .get_mut(conversation_id)
            .filter(|c| c.user_id == user_id)
            .ok_or(StoreError::ConversationDenied)?;

        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now());
        }
        conversation.messages.push(message);
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }
}
