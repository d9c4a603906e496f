//! Storage layer for flowdeck.
//!
//! Three concerns live here:
//!
//! - [`ConversationStore`]: the append-only conversation log with atomic,
//!   ownership-checked appends (implemented in-process; production backs the
//!   same trait with a document store)
//! - [`FlowRepository`] / [`ContextRepository`]: narrow collaborator
//!   contracts the chat pipeline consumes. CRUD routing, pagination, and
//!   database bootstrap live outside this workspace.
//! - [`ShortTermCache`]: process-wide TTL cache for context summaries and
//!   dismissal markers
//!
//! All repository methods are scoped by `user_id`: a missing record and a
//! record owned by someone else are indistinguishable to the caller.

// Repositories are consumed through generic bounds, never trait objects, so
// the auto-trait leakage of async fns in traits is acceptable here.
#![allow(async_fn_in_trait)]

mod cache;
mod conversations;
mod memory;

pub use cache::ShortTermCache;
pub use conversations::{ConversationStore, InMemoryConversationStore};
pub use memory::{InMemoryContextRepository, InMemoryFlowRepository};

use thiserror::Error;

use flowdeck_types::{Context, Flow, FlowDraft, FlowUpdate};

/// Cache key for a context's AI-generated summary.
#[must_use]
pub fn summary_cache_key(context_id: &str) -> String {
    format!("summary:{context_id}")
}

/// Cache key marking a recently dismissed flow suggestion.
#[must_use]
pub fn dismissal_cache_key(context_id: &str, normalized_title: &str) -> String {
    format!("dismissed:{context_id}:{normalized_title}")
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The conversation does not exist or is not owned by the caller. The
    /// two cases are deliberately indistinguishable.
    #[error("conversation not found or unauthorized")]
    ConversationDenied,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Flow persistence contract, scoped by user.
pub trait FlowRepository {
    async fn get_by_id(&self, flow_id: &str, user_id: &str) -> Result<Option<Flow>, StoreError>;

    async fn create(&self, user_id: &str, draft: FlowDraft) -> Result<Flow, StoreError>;

    /// Apply a partial update. Returns `None` when the flow is missing or
    /// not owned by the user.
    async fn update(
        &self,
        flow_id: &str,
        user_id: &str,
        updates: FlowUpdate,
    ) -> Result<Option<Flow>, StoreError>;

    /// Returns `true` when a flow was actually removed.
    async fn delete(&self, flow_id: &str, user_id: &str) -> Result<bool, StoreError>;

    async fn mark_complete(
        &self,
        flow_id: &str,
        user_id: &str,
    ) -> Result<Option<Flow>, StoreError>;

    async fn list_by_context(
        &self,
        context_id: &str,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Flow>, StoreError>;
}

/// Context lookup contract; the pipeline only needs ownership checks and
/// display names.
pub trait ContextRepository {
    async fn get_by_id(
        &self,
        context_id: &str,
        user_id: &str,
    ) -> Result<Option<Context>, StoreError>;
}
