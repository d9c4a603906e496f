//! Tool contract types shared by the registry and the provider clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::FlowPriority;

/// A tool the model may call: name, a description the model uses to decide
/// when to call it, and a JSON-schema object describing the parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Result of one tool execution, echoed back to both the model-visible
/// transcript and the `tool_executed` SSE frame.
///
/// Exactly one of `message` (success) or `error` (failure) is set; the
/// identifier fields echo whichever parts of the target the tool touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub flow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub flow_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_priority: Option<FlowPriority>,
}

impl ToolOutcome {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_flow(mut self, flow_id: impl Into<String>, flow_title: impl Into<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self.flow_title = Some(flow_title.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: FlowPriority) -> Self {
        self.new_priority = Some(priority);
        self
    }
}
