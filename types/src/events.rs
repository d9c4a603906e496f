//! Outbound SSE event catalogue.
//!
//! One chat turn emits a sequence of these frames. The wire shape is
//! `{"type": <snake_case>, "payload": {...}}`, one JSON object per `data:`
//! line, matching what the web client consumes.

use serde::Serialize;
use serde_json::Value;

use crate::flow::Flow;
use crate::tool::ToolOutcome;

/// Stable error codes the client branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorCode {
    RateLimited,
    ProviderTimeout,
    AiServiceError,
    InternalError,
}

/// One outbound SSE frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental assistant text. The final frame of a reply carries an
    /// empty token with `isComplete: true`.
    AssistantToken {
        token: String,
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "isComplete")]
        is_complete: bool,
    },
    /// A tool call resolved (successfully or not).
    ToolExecuted {
        tool_name: String,
        tool_id: String,
        arguments: Value,
        result: ToolOutcome,
    },
    /// The assistant reply was persisted to the conversation.
    ConversationUpdated { conversation_id: String },
    /// Flows were created from the exchange. Only sent when non-empty.
    FlowsExtracted { flows: Vec<Flow> },
    /// Fatal failure; terminal. At most one per stream.
    Error {
        message: String,
        code: StreamErrorCode,
    },
    /// Terminal success marker; always last on the happy path.
    Done {},
}

impl ChatEvent {
    /// Render this event as a complete SSE frame (`data: {...}\n\n`).
    #[must_use]
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","payload":{"message":"event serialization failed","code":"internal_error"}}"#
                .to_string()
        });
        format!("data: {json}\n\n")
    }
}
