//! Tool definitions and execution against flow storage.
//!
//! Every tool resolves its target by id scoped to the calling user before
//! mutating anything. A target that has vanished (deleted by the user while
//! the model was thinking) is reported as a neutral success, not an error —
//! otherwise the model treats the race as a failure and retries
//! destructively.

use serde_json::{Value, json};

use flowdeck_store::{FlowRepository, ShortTermCache, StoreError, summary_cache_key};
use flowdeck_types::{FlowPriority, FlowTitle, FlowUpdate, ToolDefinition, ToolOutcome};

const ALREADY_GONE: &str = "That flow is already gone or cleared; nothing left to do";

/// Registry of the tools offered to the model, with their schemas and
/// executors.
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        let definitions = vec![
            ToolDefinition {
                name: "mark_flow_complete",
                description: "Mark a flow (task/todo) as complete. Use this when the user asks \
                              to complete, finish, mark as done, or check off a task.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "flow_id": {
                            "type": "string",
                            "description": "The ID of the flow to mark as complete",
                        },
                        "reason": {
                            "type": "string",
                            "description": "Optional reason or confirmation message",
                        },
                    },
                    "required": ["flow_id"],
                }),
            },
            ToolDefinition {
                name: "delete_flow",
                description: "Delete a flow (task/todo) permanently. Use this when the user asks \
                              to delete, remove, or get rid of a task.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "flow_id": {
                            "type": "string",
                            "description": "The ID of the flow to delete",
                        },
                        "reason": {
                            "type": "string",
                            "description": "Optional reason for deletion",
                        },
                    },
                    "required": ["flow_id"],
                }),
            },
            ToolDefinition {
                name: "update_flow_priority",
                description: "Update the priority of a flow (task/todo). Use this when the user \
                              wants to change how important or urgent a task is.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "flow_id": {
                            "type": "string",
                            "description": "The ID of the flow to update",
                        },
                        "priority": {
                            "type": "string",
                            "enum": ["low", "medium", "high"],
                            "description": "The new priority level",
                        },
                    },
                    "required": ["flow_id", "priority"],
                }),
            },
            ToolDefinition {
                name: "rename_flow",
                description: "Rename a flow (task/todo). Use this when the user wants to change \
                              a task's title or fix its wording.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "flow_id": {
                            "type": "string",
                            "description": "The ID of the flow to rename",
                        },
                        "title": {
                            "type": "string",
                            "description": "The new title (1-200 characters)",
                        },
                    },
                    "required": ["flow_id", "title"],
                }),
            },
        ];
        Self { definitions }
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Execute a tool by name.
    ///
    /// Never panics and never propagates: unknown names, malformed
    /// arguments, and storage failures all come back as
    /// `{success: false, error}` outcomes.
    pub async fn execute<F: FlowRepository>(
        &self,
        name: &str,
        arguments: &Value,
        user_id: &str,
        flows: &F,
        summaries: &ShortTermCache<String>,
    ) -> ToolOutcome {
        let result = match name {
            "mark_flow_complete" => mark_complete(arguments, user_id, flows, summaries).await,
            "delete_flow" => delete(arguments, user_id, flows, summaries).await,
            "update_flow_priority" => update_priority(arguments, user_id, flows, summaries).await,
            "rename_flow" => rename(arguments, user_id, flows, summaries).await,
            _ => {
                tracing::error!(tool = name, "unknown tool requested");
                return ToolOutcome::failed(format!("Unknown tool: {name}"));
            }
        };

        match result {
            Ok(outcome) => {
                tracing::info!(tool = name, success = outcome.success, "tool executed");
                outcome
            }
            Err(e) => {
                tracing::error!(tool = name, error = %e, "tool execution failed");
                ToolOutcome::failed(format!("Tool execution failed: {e}"))
            }
        }
    }
}

fn required_str<'a>(arguments: &'a Value, field: &str) -> Option<&'a str> {
    arguments.get(field).and_then(Value::as_str)
}

async fn mark_complete<F: FlowRepository>(
    arguments: &Value,
    user_id: &str,
    flows: &F,
    summaries: &ShortTermCache<String>,
) -> Result<ToolOutcome, StoreError> {
    let Some(flow_id) = required_str(arguments, "flow_id") else {
        return Ok(ToolOutcome::failed("missing required argument: flow_id"));
    };

    let Some(flow) = flows.get_by_id(flow_id, user_id).await? else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    if flow.is_completed {
        return Ok(
            ToolOutcome::ok(format!("'{}' is already cleared", flow.title))
                .with_flow(flow_id, flow.title.clone()),
        );
    }

    let Some(updated) = flows.mark_complete(flow_id, user_id).await? else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    summaries.delete(&summary_cache_key(&updated.context_id));
    Ok(
        ToolOutcome::ok(format!("Marked '{}' as complete", updated.title))
            .with_flow(flow_id, updated.title.clone()),
    )
}

async fn delete<F: FlowRepository>(
    arguments: &Value,
    user_id: &str,
    flows: &F,
    summaries: &ShortTermCache<String>,
) -> Result<ToolOutcome, StoreError> {
    let Some(flow_id) = required_str(arguments, "flow_id") else {
        return Ok(ToolOutcome::failed("missing required argument: flow_id"));
    };

    let Some(flow) = flows.get_by_id(flow_id, user_id).await? else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    if !flows.delete(flow_id, user_id).await? {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    }

    summaries.delete(&summary_cache_key(&flow.context_id));
    Ok(ToolOutcome::ok(format!("Deleted '{}'", flow.title)).with_flow(flow_id, flow.title.clone()))
}

async fn update_priority<F: FlowRepository>(
    arguments: &Value,
    user_id: &str,
    flows: &F,
    summaries: &ShortTermCache<String>,
) -> Result<ToolOutcome, StoreError> {
    let Some(flow_id) = required_str(arguments, "flow_id") else {
        return Ok(ToolOutcome::failed("missing required argument: flow_id"));
    };
    let Some(raw_priority) = required_str(arguments, "priority") else {
        return Ok(ToolOutcome::failed("missing required argument: priority"));
    };
    let Some(priority) = FlowPriority::parse(raw_priority) else {
        return Ok(ToolOutcome::failed(format!(
            "Invalid priority: {raw_priority}"
        )));
    };

    if flows.get_by_id(flow_id, user_id).await?.is_none() {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    }

    let Some(updated) = flows
        .update(flow_id, user_id, FlowUpdate::priority(priority))
        .await?
    else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    summaries.delete(&summary_cache_key(&updated.context_id));
    Ok(ToolOutcome::ok(format!(
        "Updated '{}' priority to {}",
        updated.title,
        priority.as_str()
    ))
    .with_flow(flow_id, updated.title.clone())
    .with_priority(priority))
}

async fn rename<F: FlowRepository>(
    arguments: &Value,
    user_id: &str,
    flows: &F,
    summaries: &ShortTermCache<String>,
) -> Result<ToolOutcome, StoreError> {
    let Some(flow_id) = required_str(arguments, "flow_id") else {
        return Ok(ToolOutcome::failed("missing required argument: flow_id"));
    };
    let Some(raw_title) = required_str(arguments, "title") else {
        return Ok(ToolOutcome::failed("missing required argument: title"));
    };
    let new_title = match FlowTitle::new(raw_title) {
        Ok(title) => title,
        Err(e) => return Ok(ToolOutcome::failed(format!("Invalid title: {e}"))),
    };

    let Some(flow) = flows.get_by_id(flow_id, user_id).await? else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    let Some(updated) = flows
        .update(flow_id, user_id, FlowUpdate::title(new_title))
        .await?
    else {
        return Ok(ToolOutcome::ok(ALREADY_GONE));
    };

    summaries.delete(&summary_cache_key(&updated.context_id));
    Ok(ToolOutcome::ok(format!(
        "Renamed '{}' to '{}'",
        flow.title, updated.title
    ))
    .with_flow(flow_id, updated.title.clone()))
}
