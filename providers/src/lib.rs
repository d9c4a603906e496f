//! LLM provider clients with unified streaming support.
//!
//! # Architecture
//!
//! The crate is organized around a closed provider dispatch pattern:
//!
//! - [`ChatClient`] - Tagged union over provider implementations, selected
//!   once at construction; callers never branch on provider identity again
//! - [`openai`] - OpenAI Chat Completions API client
//! - [`anthropic`] - Anthropic Messages API client
//!
//! Both providers emit events through a [`tokio::sync::mpsc::Sender<ChunkEvent>`]
//! channel, allowing the caller to process streaming content as it arrives.
//!
//! # Streaming Events
//!
//! All providers normalize their responses to [`ChunkEvent`]:
//!
//! | Event | Description |
//! |-------|-------------|
//! | `Text` | Incremental text content from the model |
//! | `ToolCall` | A fully reassembled tool call (emitted at stream end) |
//! | `Done` | Stream completed successfully |
//! | `Error` | Stream terminated with a [`ProviderError`] |
//!
//! Tool-call arguments arrive from providers as JSON fragments spread across
//! stream chunks, keyed by a stable index. Each stream owns a
//! [`ToolCallAssembler`] that buffers fragments per index; completed calls
//! are flushed only once the provider signals end-of-stream.
//!
//! # Error Handling
//!
//! Provider/API failures during streaming are delivered as
//! `ChunkEvent::Error` events rather than `Result::Err` returns, allowing
//! partial output to be captured before the error occurs. Low-level failures
//! that prevent reading the HTTP response stream may still return `Err`.
//! There are no automatic retries: a failed call ends the stream and the
//! caller resubmits.

pub mod sse_types;

/// Anthropic Messages API implementation.
///
/// Communicates with `{base}/v1/messages`. The system instruction travels as
/// the top-level `system` parameter; system-role history messages are
/// filtered out of the turn list. Tool calls arrive as `tool_use` content
/// blocks whose `input_json_delta` fragments are reassembled per block
/// index.
pub mod anthropic;

/// OpenAI Chat Completions API implementation.
///
/// Communicates with `{base}/chat/completions`. Tool calls arrive as
/// `tool_calls` deltas carrying an array index, an id/name on the first
/// fragment, and argument-JSON fragments on subsequent ones.
pub mod openai;

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

pub(crate) use anyhow::Result;
use serde_json::Value;
use thiserror::Error;
pub(crate) use tokio::sync::mpsc;

use flowdeck_types::{FlowSummary, Message, ToolDefinition};

/// Canonical OpenAI API base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";
/// Canonical Anthropic API base URL.
pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Provider failures. All three are fatal for the stream that raised them.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("provider request timed out: {0}")]
    Timeout(String),
    #[error("provider request failed: {0}")]
    Upstream(String),
}

/// A tool call fully reassembled from stream fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument JSON exactly as the model produced it. Parsed (and
    /// distrusted) by the caller.
    pub arguments: String,
}

/// One normalized event from a provider stream.
#[derive(Debug, Clone)]
pub enum ChunkEvent {
    Text(String),
    ToolCall(CompletedToolCall),
    Done,
    Error(ProviderError),
}

/// Inputs for one streamed chat turn.
pub struct ChatStreamRequest<'a> {
    pub messages: &'a [Message],
    pub context_id: &'a str,
    /// Friendly context name for the system prompt; falls back to the id.
    pub context_name: Option<&'a str>,
    pub tools: Option<&'a [ToolDefinition]>,
    /// Open flows the model may reference by id when calling tools.
    pub available_flows: Option<&'a [FlowSummary]>,
}

/// Accumulates tool-call argument fragments per stream index.
///
/// Scoped to a single stream's lifetime; flushed to completed calls only at
/// stream end so the caller never sees a half-built call.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAssembler {
    builders: BTreeMap<u32, ToolCallBuilder>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    /// Merge one fragment for the call at `index`. Providers may deliver the
    /// id and name on the first fragment only, or on every fragment.
    pub(crate) fn merge(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let builder = self.builders.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.trim().is_empty()) {
            builder.id.get_or_insert_with(|| id.to_string());
        }
        if let Some(name) = name.filter(|s| !s.trim().is_empty()) {
            builder.name.get_or_insert_with(|| name.to_string());
        }
        if let Some(fragment) = arguments {
            builder.arguments.push_str(fragment);
        }
    }

    /// Drain completed calls in index order. Builders that never received a
    /// name are dropped; a missing id is synthesized from the index.
    pub(crate) fn finish(&mut self) -> Vec<CompletedToolCall> {
        let builders = std::mem::take(&mut self.builders);
        builders
            .into_iter()
            .filter_map(|(index, builder)| {
                let Some(name) = builder.name else {
                    tracing::warn!(index, "Dropping tool call fragment with no name");
                    return None;
                };
                Some(CompletedToolCall {
                    id: builder.id.unwrap_or_else(|| format!("call_{index}")),
                    name,
                    arguments: builder.arguments,
                })
            })
            .collect()
    }
}

/// Build the per-turn system instruction.
///
/// Always names the context. When tools are offered the prompt also lists
/// the open flows (id, title, state, priority) so the model can reference
/// valid ids, and tells it when to reach for the tools.
pub(crate) fn build_system_prompt(request: &ChatStreamRequest<'_>) -> String {
    let context_label = request.context_name.unwrap_or(request.context_id);
    let mut prompt = format!("You are an assistant for the user's {context_label} context.");

    let tools_offered = request.tools.is_some_and(|tools| !tools.is_empty());
    if tools_offered {
        prompt.push_str(
            "\n\nYou can manage the user's flows (tasks) with the provided tools. \
             When the user asks to complete, delete, reprioritize, or rename a task, \
             call the matching tool using the flow id from the list below. \
             Never invent flow ids.",
        );
        prompt.push_str("\n\nFlows currently in this context:");
        match request.available_flows {
            Some(flows) if !flows.is_empty() => {
                for flow in flows {
                    let state = if flow.is_completed { "done" } else { "open" };
                    prompt.push_str(&format!(
                        "\n- [{}] \"{}\" ({}, {state})",
                        flow.id,
                        flow.title,
                        flow.priority.as_str()
                    ));
                }
            }
            _ => prompt.push_str("\n(none yet)"),
        }
    }

    prompt
}

pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Falling back to defaults.");
                reqwest::Client::new()
            })
    })
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let timeout = std::env::var("FLOWDECK_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(timeout)
    })
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

#[derive(Debug)]
pub(crate) enum SseParseAction {
    /// Continue processing, no event to emit
    Continue,
    /// Emit these events and continue
    Emit(Vec<ChunkEvent>),
    /// Stream is done (message_stop or equivalent)
    Done,
    Error(ProviderError),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &Value) -> SseParseAction;
    /// Called exactly once when the stream ends cleanly; flushes buffered
    /// tool calls in index order.
    fn finish(&mut self) -> Vec<ChunkEvent>;
    fn provider_name(&self) -> &'static str;
}

pub(crate) async fn send_event(tx: &mpsc::Sender<ChunkEvent>, event: ChunkEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Flush buffered tool calls, then mark the stream done.
async fn finish_stream<P: SseParser>(parser: &mut P, tx: &mpsc::Sender<ChunkEvent>) {
    for event in parser.finish() {
        if !send_event(tx, event).await {
            return;
        }
    }
    let _ = send_event(tx, ChunkEvent::Done).await;
}

/// Process an SSE stream using a provider-specific parser.
///
/// This handles the common SSE processing logic:
/// - Timeout handling for idle streams
/// - Buffer management with size limits
/// - UTF-8 validation
/// - Event boundary detection
/// - `[DONE]` marker handling
/// - Parse error tracking with threshold
pub(crate) async fn process_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<ChunkEvent>,
    idle_timeout: Duration,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_event(
                tx,
                ChunkEvent::Error(ProviderError::Timeout("stream idle timeout".to_string())),
            )
            .await;
            return Ok(());
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        // Security: prevent unbounded buffer growth
        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_event(
                tx,
                ChunkEvent::Error(ProviderError::Upstream(
                    "SSE buffer exceeded maximum size (4 MiB)".to_string(),
                )),
            )
            .await;
            return Ok(());
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_event(
                    tx,
                    ChunkEvent::Error(ProviderError::Upstream(
                        "received invalid UTF-8 from SSE stream".to_string(),
                    )),
                )
                .await;
                return Ok(());
            };

            let Some(data) = extract_sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                finish_stream(parser, tx).await;
                return Ok(());
            }

            match serde_json::from_str::<Value>(&data) {
                Ok(json) => {
                    parse_errors = 0;
                    match parser.parse(&json) {
                        SseParseAction::Continue => {}
                        SseParseAction::Emit(events) => {
                            for event in events {
                                if !send_event(tx, event).await {
                                    return Ok(());
                                }
                            }
                        }
                        SseParseAction::Done => {
                            finish_stream(parser, tx).await;
                            return Ok(());
                        }
                        SseParseAction::Error(err) => {
                            let _ = send_event(tx, ChunkEvent::Error(err)).await;
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        provider = parser.provider_name(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            ChunkEvent::Error(ProviderError::Upstream(format!(
                                "invalid stream payload: {e}"
                            ))),
                        )
                        .await;
                        return Ok(());
                    }
                }
            }
        }
    }

    // Premature EOF: connection closed without completion signal
    let _ = send_event(
        tx,
        ChunkEvent::Error(ProviderError::Upstream(
            "connection closed before stream completed".to_string(),
        )),
    )
    .await;
    Ok(())
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Classify a transport-level send failure.
pub(crate) fn classify_send_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Upstream(e.to_string())
    }
}

/// Classify a non-success HTTP status, consuming the response body (capped).
pub(crate) async fn classify_status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = read_capped_error_body(response).await;
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(format!("API error {status}: {body}"))
    } else {
        ProviderError::Upstream(format!("API error {status}: {body}"))
    }
}

/// Provider dispatch: a closed union over the configured client.
///
/// Constructed once (from settings) and shared for the process lifetime;
/// everything downstream is polymorphic over the capability set
/// {stream text, stream tool calls, complete}.
#[derive(Debug, Clone)]
pub enum ChatClient {
    OpenAi(openai::OpenAiClient),
    Anthropic(anthropic::AnthropicClient),
}

impl ChatClient {
    #[must_use]
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::OpenAi(openai::OpenAiClient::new(api_key, model))
    }

    #[must_use]
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::Anthropic(anthropic::AnthropicClient::new(api_key, model))
    }

    /// Point the client at a different API origin. Used by tests to target a
    /// local mock server.
    #[must_use]
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        match self {
            Self::OpenAi(client) => Self::OpenAi(client.with_base_url(base_url)),
            Self::Anthropic(client) => Self::Anthropic(client.with_base_url(base_url)),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(client) => client.model(),
            Self::Anthropic(client) => client.model(),
        }
    }

    /// Stream one chat turn. Events (including the terminal `Done`/`Error`)
    /// are delivered through `tx`; an `Err` return means the response body
    /// itself could not be read.
    pub async fn stream_chat(
        &self,
        request: ChatStreamRequest<'_>,
        tx: mpsc::Sender<ChunkEvent>,
    ) -> Result<()> {
        match self {
            Self::OpenAi(client) => client.stream_chat(&request, tx).await,
            Self::Anthropic(client) => client.stream_chat(&request, tx).await,
        }
    }

    /// One-shot (non-streaming) completion used by flow extraction.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> std::result::Result<String, ProviderError> {
        match self {
            Self::OpenAi(client) => client.complete(system_prompt, user_prompt).await,
            Self::Anthropic(client) => client.complete(system_prompt, user_prompt).await,
        }
    }
}
