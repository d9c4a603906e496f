use serde_json::{Value, json};

use crate::{
    ChatStreamRequest, ChunkEvent, ProviderError, Result, SseParseAction, SseParser,
    ToolCallAssembler, build_system_prompt, classify_send_error, classify_status_error,
    http_client, mpsc, process_sse_stream, send_event, stream_idle_timeout,
};
use flowdeck_types::MessageRole;

use crate::sse_types::anthropic as typed;

const MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const STREAM_MAX_TOKENS: u32 = 4096;
const EXTRACTION_TEMPERATURE: f64 = 0.3;
const EXTRACTION_MAX_TOKENS: u32 = 1024;

#[derive(Default)]
struct AnthropicParser {
    assembler: ToolCallAssembler,
    /// Index of the tool_use block currently receiving input_json_delta
    /// fragments. Text blocks never set this.
    current_tool_index: Option<u32>,
}

impl SseParser for AnthropicParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let event: typed::Event = match serde_json::from_value(json.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%e, provider = "Anthropic", "Failed to parse SSE event");
                return SseParseAction::Continue;
            }
        };

        let mut events = Vec::new();

        match event {
            typed::Event::ContentBlockStart {
                index,
                content_block,
            } => {
                if let typed::ContentBlock::ToolUse { id, name } = content_block {
                    if id.is_empty() {
                        return SseParseAction::Error(ProviderError::Upstream(
                            "Anthropic tool call missing id".to_string(),
                        ));
                    }
                    if name.is_empty() {
                        return SseParseAction::Error(ProviderError::Upstream(
                            "Anthropic tool call missing name".to_string(),
                        ));
                    }
                    self.assembler.merge(index, Some(&id), Some(&name), None);
                    self.current_tool_index = Some(index);
                }
            }

            typed::Event::ContentBlockDelta { index, delta } => match delta {
                typed::Delta::TextDelta { text } => {
                    events.push(ChunkEvent::Text(text));
                }
                typed::Delta::InputJsonDelta { partial_json } => {
                    if self.current_tool_index == Some(index) {
                        self.assembler.merge(index, None, None, Some(&partial_json));
                    }
                }
                typed::Delta::Unknown => {}
            },

            typed::Event::ContentBlockStop { .. } => {
                self.current_tool_index = None;
            }

            typed::Event::MessageStop => {
                return SseParseAction::Done;
            }

            typed::Event::Error { error } => {
                let message = if error.message.is_empty() {
                    format!("Anthropic stream error: {}", error.error_type)
                } else {
                    error.message
                };
                return SseParseAction::Error(ProviderError::Upstream(message));
            }

            typed::Event::MessageStart
            | typed::Event::MessageDelta
            | typed::Event::Ping
            | typed::Event::Unknown => {}
        }

        if events.is_empty() {
            SseParseAction::Continue
        } else {
            SseParseAction::Emit(events)
        }
    }

    fn finish(&mut self) -> Vec<ChunkEvent> {
        self.assembler
            .finish()
            .into_iter()
            .map(ChunkEvent::ToolCall)
            .collect()
    }

    fn provider_name(&self) -> &'static str {
        "Anthropic"
    }
}

fn build_stream_body(model: &str, request: &ChatStreamRequest<'_>) -> Value {
    let system_prompt = build_system_prompt(request);

    // The Messages API takes the system instruction as a top-level
    // parameter; system-role history entries are filtered out.
    let api_messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|msg| msg.role != MessageRole::System)
        .map(|msg| {
            json!({
                "role": msg.role.as_str(),
                "content": msg.content.as_str(),
            })
        })
        .collect();

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("max_tokens".to_string(), json!(STREAM_MAX_TOKENS));
    body.insert("system".to_string(), json!(system_prompt));
    body.insert("messages".to_string(), Value::Array(api_messages));
    body.insert("stream".to_string(), json!(true));

    if let Some(tools) = request.tools
        && !tools.is_empty()
    {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(tool_defs));
    }

    Value::Object(body)
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicClient {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: crate::ANTHROPIC_API_BASE_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}{MESSAGES_PATH}", self.base_url.trim_end_matches('/'))
    }

    fn request_builder(&self) -> reqwest::RequestBuilder {
        http_client()
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
    }

    pub(crate) async fn stream_chat(
        &self,
        request: &ChatStreamRequest<'_>,
        tx: mpsc::Sender<ChunkEvent>,
    ) -> Result<()> {
        let body = build_stream_body(&self.model, request);

        tracing::debug!(
            context_id = request.context_id,
            messages = request.messages.len(),
            "Starting Anthropic stream"
        );

        let response = match self.request_builder().json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let _ = send_event(&tx, ChunkEvent::Error(classify_send_error(&e))).await;
                return Ok(());
            }
        };

        if !response.status().is_success() {
            let err = classify_status_error(response).await;
            let _ = send_event(&tx, ChunkEvent::Error(err)).await;
            return Ok(());
        }

        let mut parser = AnthropicParser::default();
        process_sse_stream(response, &mut parser, &tx, stream_idle_timeout()).await
    }

    pub(crate) async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": EXTRACTION_MAX_TOKENS,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
            "temperature": EXTRACTION_TEMPERATURE,
        });

        let response = self
            .request_builder()
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        if !response.status().is_success() {
            return Err(classify_status_error(response).await);
        }

        let parsed: typed::MessageResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(format!("invalid completion response: {e}")))?;

        Ok(parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                typed::ResponseBlock::Text { text } => Some(text),
                typed::ResponseBlock::Unknown => None,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::{AnthropicParser, ChunkEvent, SseParseAction, SseParser, build_stream_body};
    use crate::ChatStreamRequest;
    use flowdeck_types::{Message, MessageContent};
    use serde_json::json;

    fn content(text: &str) -> MessageContent {
        MessageContent::new(text).unwrap()
    }

    #[test]
    fn stream_body_filters_system_messages_into_parameter() {
        let messages = [
            Message::system(content("earlier system note")),
            Message::user(content("hi")),
            Message::assistant(content("hello")),
        ];
        let request = ChatStreamRequest {
            messages: &messages,
            context_id: "ctx-1",
            context_name: None,
            tools: None,
            available_flows: None,
        };
        let body = build_stream_body("claude-3-5-sonnet-20241022", &request);

        let wire = body["messages"].as_array().unwrap();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["role"], "assistant");
        assert!(body["system"].as_str().unwrap().contains("ctx-1 context"));
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn parser_emits_text_and_buffers_tool_input() {
        let mut parser = AnthropicParser::default();

        let action = parser.parse(&json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "On it."}
        }));
        match action {
            SseParseAction::Emit(events) => {
                assert!(matches!(&events[0], ChunkEvent::Text(t) if t == "On it."));
            }
            other => panic!("expected Emit, got {other:?}"),
        }

        let start = parser.parse(&json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "mark_flow_complete"}
        }));
        assert!(matches!(start, SseParseAction::Continue));

        for fragment in ["{\"flow_id\":", "\"f1\"}"] {
            let delta = parser.parse(&json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": fragment}
            }));
            assert!(matches!(delta, SseParseAction::Continue));
        }

        let stop = parser.parse(&json!({"type": "message_stop"}));
        assert!(matches!(stop, SseParseAction::Done));

        let flushed = parser.finish();
        assert_eq!(flushed.len(), 1);
        match &flushed[0] {
            ChunkEvent::ToolCall(call) => {
                assert_eq!(call.id, "toolu_1");
                assert_eq!(call.name, "mark_flow_complete");
                assert_eq!(call.arguments, "{\"flow_id\":\"f1\"}");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
    }

    #[test]
    fn parser_rejects_tool_use_without_id() {
        let mut parser = AnthropicParser::default();
        let action = parser.parse(&json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "", "name": "delete_flow"}
        }));
        assert!(matches!(action, SseParseAction::Error(_)));
    }

    #[test]
    fn parser_ignores_ping_and_unknown_events() {
        let mut parser = AnthropicParser::default();
        assert!(matches!(
            parser.parse(&json!({"type": "ping"})),
            SseParseAction::Continue
        ));
        assert!(matches!(
            parser.parse(&json!({"type": "future_event"})),
            SseParseAction::Continue
        ));
    }
}
