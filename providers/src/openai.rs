use serde_json::{Value, json};

use crate::{
    ChatStreamRequest, ChunkEvent, ProviderError, Result, SseParseAction, SseParser,
    ToolCallAssembler, build_system_prompt, classify_send_error, classify_status_error,
    http_client, mpsc, process_sse_stream, send_event, stream_idle_timeout,
};

use crate::sse_types::openai as typed;

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// Sampling used for extraction calls: low temperature for consistent
/// structured output, bounded reply size.
const EXTRACTION_TEMPERATURE: f64 = 0.3;
const EXTRACTION_MAX_TOKENS: u32 = 1024;

#[derive(Default)]
struct OpenAiParser {
    assembler: ToolCallAssembler,
}

impl SseParser for OpenAiParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let chunk: typed::StreamChunk = match serde_json::from_value(json.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Failed to parse OpenAI SSE chunk: {e}");
                return SseParseAction::Continue;
            }
        };

        if let Some(error) = chunk.error {
            let message = if error.message.is_empty() {
                format!("OpenAI stream error: {}", error.error_type)
            } else {
                error.message
            };
            return SseParseAction::Error(ProviderError::Upstream(message));
        }

        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                events.push(ChunkEvent::Text(content));
            }

            if let Some(tool_calls) = choice.delta.tool_calls {
                for call in tool_calls {
                    let function = call.function.unwrap_or_default();
                    self.assembler.merge(
                        call.index,
                        call.id.as_deref(),
                        function.name.as_deref(),
                        function.arguments.as_deref(),
                    );
                }
            }
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
        "OpenAI"
    }
}

fn build_stream_body(model: &str, request: &ChatStreamRequest<'_>) -> Value {
    let system_prompt = build_system_prompt(request);

    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
    messages.push(json!({"role": "system", "content": system_prompt}));
    for msg in request.messages {
        messages.push(json!({
            "role": msg.role.as_str(),
            "content": msg.content.as_str(),
        }));
    }

    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("stream".to_string(), json!(true));

    if let Some(tools) = request.tools
        && !tools.is_empty()
    {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(tool_defs));
    }

    Value::Object(body)
}

/// OpenAI Chat Completions client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: crate::OPENAI_API_BASE_URL.to_string(),
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
        format!(
            "{}{CHAT_COMPLETIONS_PATH}",
            self.base_url.trim_end_matches('/')
        )
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
            "Starting OpenAI stream"
        );

        let response = match http_client()
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
        {
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

        let mut parser = OpenAiParser::default();
        process_sse_stream(response, &mut parser, &tx, stream_idle_timeout()).await
    }

    pub(crate) async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "response_format": {"type": "json_object"},
            "temperature": EXTRACTION_TEMPERATURE,
            "max_tokens": EXTRACTION_MAX_TOKENS,
        });

        let response = http_client()
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        if !response.status().is_success() {
            return Err(classify_status_error(response).await);
        }

        let parsed: typed::CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(format!("invalid completion response: {e}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}
