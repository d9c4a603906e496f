//! Process-local repository implementations.
//!
//! These back the [`FlowRepository`] and [`ContextRepository`] contracts
//! with plain maps so the chat pipeline can be exercised end-to-end without
//! a database. A production deployment substitutes document-store-backed
//! implementations of the same traits.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::{ContextRepository, FlowRepository, StoreError};
use flowdeck_types::{Context, Flow, FlowDraft, FlowUpdate};

#[derive(Default)]
pub struct InMemoryFlowRepository {
    flows: Mutex<HashMap<String, Flow>>,
}

impl InMemoryFlowRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flow>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlowRepository for InMemoryFlowRepository {
    async fn get_by_id(&self, flow_id: &str, user_id: &str) -> Result<Option<Flow>, StoreError> {
        Ok(self
            .lock()
            .get(flow_id)
            .filter(|f| f.user_id == user_id)
            .cloned())
    }

    async fn create(&self, user_id: &str, draft: FlowDraft) -> Result<Flow, StoreError> {
        let now = Utc::now();
        let flow = Flow {
            id: Uuid::new_v4().to_string(),
            context_id: draft.context_id,
            user_id: user_id.to_string(),
            title: draft.title.into_inner(),
            description: draft.description,
            priority: draft.priority,
            is_completed: false,
            due_date: draft.due_date,
            reminder_enabled: draft.reminder_enabled,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.lock().insert(flow.id.clone(), flow.clone());
        Ok(flow)
    }

    async fn update(
        &self,
        flow_id: &str,
        user_id: &str,
        updates: FlowUpdate,
    ) -> Result<Option<Flow>, StoreError> {
        let mut flows = self.lock();
        let Some(flow) = flows.get_mut(flow_id).filter(|f| f.user_id == user_id) else {
            return Ok(None);
        };

        if let Some(title) = updates.title {
            flow.title = title.into_inner();
        }
        if let Some(description) = updates.description {
            flow.description = Some(description);
        }
        if let Some(priority) = updates.priority {
            flow.priority = priority;
        }
        if let Some(due_date) = updates.due_date {
            flow.due_date = Some(due_date);
        }
        if let Some(reminder_enabled) = updates.reminder_enabled {
            flow.reminder_enabled = reminder_enabled;
        }
        flow.updated_at = Utc::now();
        Ok(Some(flow.clone()))
    }

    async fn delete(&self, flow_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let mut flows = self.lock();
        let owned = flows
            .get(flow_id)
            .is_some_and(|f| f.user_id == user_id);
        if owned {
            flows.remove(flow_id);
        }
        Ok(owned)
    }

    async fn mark_complete(
        &self,
        flow_id: &str,
        user_id: &str,
    ) -> Result<Option<Flow>, StoreError> {
        let mut flows = self.lock();
        let Some(flow) = flows.get_mut(flow_id).filter(|f| f.user_id == user_id) else {
            return Ok(None);
        };
        let now = Utc::now();
        flow.is_completed = true;
        flow.completed_at = Some(now);
        flow.updated_at = now;
        Ok(Some(flow.clone()))
    }

    async fn list_by_context(
        &self,
        context_id: &str,
        user_id: &str,
        include_completed: bool,
    ) -> Result<Vec<Flow>, StoreError> {
        let mut flows: Vec<Flow> = self
            .lock()
            .values()
            .filter(|f| {
                f.context_id == context_id
                    && f.user_id == user_id
                    && (include_completed || !f.is_completed)
            })
            .cloned()
            .collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(flows)
    }
}

#[derive(Default)]
pub struct InMemoryContextRepository {
    contexts: Mutex<HashMap<String, Context>>,
}

impl InMemoryContextRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context. Test and bootstrap helper; context CRUD itself lives
    /// outside this workspace.
    pub fn insert(&self, context: Context) {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(context.id.clone(), context);
    }
}

impl ContextRepository for InMemoryContextRepository {
    async fn get_by_id(
        &self,
        context_id: &str,
        user_id: &str,
    ) -> Result<Option<Context>, StoreError> {
        Ok(self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(context_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }
}
