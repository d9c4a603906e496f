//! Flow (task) domain model.
//!
//! A flow is a single actionable item inside a context. Candidate flows
//! produced by extraction ([`FlowDraft`]) are distinct from persisted flows
//! ([`Flow`]): a draft only becomes a flow after it passes deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proofs::FlowTitle;

/// Priority levels for flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl FlowPriority {
    /// Case-insensitive parse of the three allowed values.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A candidate flow awaiting deduplication.
///
/// Produced by the extraction engine only; never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDraft {
    pub context_id: String,
    pub title: FlowTitle,
    pub description: Option<String>,
    pub priority: FlowPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder_enabled: bool,
}

impl FlowDraft {
    /// Build a draft from extraction output. Auto-extracted flows never
    /// carry a due date and never have reminders enabled.
    #[must_use]
    pub fn extracted(
        context_id: impl Into<String>,
        title: FlowTitle,
        description: Option<String>,
        priority: FlowPriority,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            title,
            description,
            priority,
            due_date: None,
            reminder_enabled: false,
        }
    }
}

/// A persisted flow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub context_id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: FlowPriority,
    pub is_completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied to an existing flow. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct FlowUpdate {
    pub title: Option<FlowTitle>,
    pub description: Option<String>,
    pub priority: Option<FlowPriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub reminder_enabled: Option<bool>,
}

impl FlowUpdate {
    #[must_use]
    pub fn priority(priority: FlowPriority) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn title(title: FlowTitle) -> Self {
        Self {
            title: Some(title),
            ..Self::default()
        }
    }
}

/// The slice of a flow the model needs in order to reference valid ids when
/// calling tools.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub title: String,
    pub priority: FlowPriority,
    pub is_completed: bool,
}

impl From<&Flow> for FlowSummary {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.clone(),
            title: flow.title.clone(),
            priority: flow.priority,
            is_completed: flow.is_completed,
        }
    }
}

/// A context: the user-defined workspace flows and conversations live under.
///
/// Only the fields the pipeline needs: ownership checks and the friendly
/// display name for the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub user_id: String,
    pub name: String,
}
