//! The chat turn pipeline.
//!
//! `prepare` runs everything that must fail *before* the HTTP response
//! starts streaming (authorization, conversation resolution, the user-message
//! append). `stream` then produces the SSE frame sequence; nothing inside it
//! propagates an error — failures either terminate the stream with a single
//! `error` frame (provider faults) or are logged and absorbed (extraction,
//! per-candidate persistence, assistant-reply append).

use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ExtractionEngine;
use crate::tools::ToolRegistry;
use flowdeck_providers::{ChatClient, ChatStreamRequest, ChunkEvent, ProviderError};
use flowdeck_store::{
    ContextRepository, ConversationStore, FlowRepository, ShortTermCache, StoreError,
    dismissal_cache_key, summary_cache_key,
};
use flowdeck_types::{
    ChatEvent, ContentError, FlowSummary, Message, MessageContent, MessageRole, StreamErrorCode,
    ToolDefinition, ToolOutcome, normalize_title,
};

const MAX_HISTORY_MESSAGES: usize = 50;

const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// One chat turn as submitted by the client: the context, an optional
/// conversation to continue, and the full message history including the new
/// user message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub context_id: String,
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    /// True when the client resends its opening message after switching
    /// contexts; used to suppress a duplicate append.
    pub is_context_switch: bool,
}

/// Pre-stream failures. These surface as plain HTTP errors because no SSE
/// frame has been emitted yet.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("context {0} not found or not owned by caller")]
    ContextDenied(String),
    #[error("invalid chat request: {0}")]
    InvalidRequest(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything `stream` needs, resolved ahead of the first frame.
pub struct PreparedTurn {
    request: ChatRequest,
    user_id: String,
    conversation_id: String,
    user_message_added: bool,
    latest_user_content: Option<String>,
    context_name: String,
    available_flows: Vec<FlowSummary>,
    existing_title_keys: HashSet<String>,
}

impl PreparedTurn {
    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[must_use]
    pub fn user_message_added(&self) -> bool {
        self.user_message_added
    }
}

/// The per-turn orchestrator. Borrowed collaborators are shared across
/// concurrent turns; the caches are the only cross-request mutable state.
pub struct ChatPipeline<'a, C, F, X> {
    pub conversations: &'a C,
    pub flows: &'a F,
    pub contexts: &'a X,
    pub client: &'a ChatClient,
    pub tools: &'a ToolRegistry,
    pub summaries: &'a ShortTermCache<String>,
    pub dismissals: &'a ShortTermCache<bool>,
}

impl<C, F, X> ChatPipeline<'_, C, F, X>
where
    C: ConversationStore,
    F: FlowRepository,
    X: ContextRepository,
{
    /// Authorize, resolve the conversation, and append the new user message.
    pub async fn prepare(
        &self,
        request: ChatRequest,
        user_id: &str,
    ) -> Result<PreparedTurn, ChatError> {
        if request.messages.is_empty() {
            return Err(ChatError::InvalidRequest("messages must not be empty"));
        }
        if request.messages.len() > MAX_HISTORY_MESSAGES {
            return Err(ChatError::InvalidRequest(
                "message history exceeds 50 entries",
            ));
        }

        let context = self
            .contexts
            .get_by_id(&request.context_id, user_id)
            .await?
            .ok_or_else(|| ChatError::ContextDenied(request.context_id.clone()))?;

        let conversation = self.resolve_conversation(&request, user_id).await?;

        tracing::info!(
            conversation_id = %conversation.id,
            context_id = %request.context_id,
            "using conversation for chat turn"
        );

        let latest_user = request
            .messages
            .iter()
            .rev()
            .find(|msg| msg.role == MessageRole::User)
            .cloned();

        let mut user_message_added = false;
        if let Some(latest) = &latest_user {
            let duplicate_context_switch = request.is_context_switch
                && conversation.last_message().is_some_and(|last| {
                    last.role == MessageRole::User
                        && last.content.as_str() == latest.content.as_str()
                });

            if duplicate_context_switch {
                tracing::info!(
                    conversation_id = %conversation.id,
                    "skipping append for context-switch duplicate user message"
                );
            } else {
                match self
                    .conversations
                    .append_message(&conversation.id, latest.clone(), user_id)
                    .await
                {
                    Ok(_) => user_message_added = true,
                    Err(e) => tracing::error!(
                        conversation_id = %conversation.id,
                        error = %e,
                        "failed to append user message"
                    ),
                }
            }
        }

        let flows = self
            .flows
            .list_by_context(&request.context_id, user_id, false)
            .await?;
        let available_flows: Vec<FlowSummary> = flows.iter().map(FlowSummary::from).collect();
        let existing_title_keys: HashSet<String> = flows
            .iter()
            .map(|flow| normalize_title(&flow.title))
            .collect();

        Ok(PreparedTurn {
            latest_user_content: latest_user.map(|msg| msg.content.into_inner()),
            request,
            user_id: user_id.to_string(),
            conversation_id: conversation.id,
            user_message_added,
            context_name: context.name,
            available_flows,
            existing_title_keys,
        })
    }

    async fn resolve_conversation(
        &self,
        request: &ChatRequest,
        user_id: &str,
    ) -> Result<flowdeck_types::Conversation, ChatError> {
        if let Some(id) = &request.conversation_id {
            match self.conversations.get(id, user_id).await? {
                Some(conversation) => return Ok(conversation),
                None => tracing::warn!(
                    conversation_id = %id,
                    "conversation not found or unauthorized; falling back"
                ),
            }
        }

        match self
            .conversations
            .latest_for_context(&request.context_id, user_id)
            .await?
        {
            Some(conversation) => Ok(conversation),
            None => Ok(self
                .conversations
                .create(&request.context_id, user_id)
                .await?),
        }
    }

    /// Stream one chat turn into `tx`.
    ///
    /// Infallible by design: by the time this runs the HTTP response has
    /// started, so every failure is expressed as a frame.
    pub async fn stream(&self, turn: PreparedTurn, tx: &mpsc::Sender<ChatEvent>) {
        let message_id = format!("assistant-{}", Uuid::new_v4());
        let mut chunk_rx = self.spawn_provider_stream(&turn);

        let mut full_response = String::new();
        let mut tools_executed = false;

        loop {
            match chunk_rx.recv().await {
                Some(ChunkEvent::Text(token)) => {
                    full_response.push_str(&token);
                    emit(
                        tx,
                        ChatEvent::AssistantToken {
                            token,
                            message_id: message_id.clone(),
                            is_complete: false,
                        },
                    )
                    .await;
                }
                Some(ChunkEvent::ToolCall(call)) => {
                    tools_executed = true;
                    let arguments = parse_tool_arguments(&call.arguments);
                    tracing::info!(tool = %call.name, "executing tool call");

                    let result = self
                        .tools
                        .execute(
                            &call.name,
                            &arguments,
                            &turn.user_id,
                            self.flows,
                            self.summaries,
                        )
                        .await;

                    let result_line = tool_result_line(&result);
                    emit(
                        tx,
                        ChatEvent::ToolExecuted {
                            tool_name: call.name,
                            tool_id: call.id,
                            arguments,
                            result,
                        },
                    )
                    .await;

                    // Surface the outcome inline in the transcript as well
                    full_response.push_str(&result_line);
                    emit(
                        tx,
                        ChatEvent::AssistantToken {
                            token: result_line,
                            message_id: message_id.clone(),
                            is_complete: false,
                        },
                    )
                    .await;
                }
                Some(ChunkEvent::Error(err)) => {
                    tracing::error!(error = %err, "provider error during chat stream");
                    emit(tx, provider_error_frame(&err)).await;
                    return;
                }
                Some(ChunkEvent::Done) => break,
                None => {
                    tracing::error!("provider stream ended without a terminal event");
                    emit(
                        tx,
                        ChatEvent::Error {
                            message: "Internal server error".to_string(),
                            code: StreamErrorCode::InternalError,
                        },
                    )
                    .await;
                    return;
                }
            }
        }

        emit(
            tx,
            ChatEvent::AssistantToken {
                token: String::new(),
                message_id,
                is_complete: true,
            },
        )
        .await;

        tracing::info!(
            response_chars = full_response.len(),
            "chat stream completed"
        );

        self.persist_assistant_reply(&turn, &full_response).await;
        emit(
            tx,
            ChatEvent::ConversationUpdated {
                conversation_id: turn.conversation_id.clone(),
            },
        )
        .await;

        let extracted = self
            .extract_candidates(&turn, tools_executed, &full_response)
            .await;
        let created = self.create_deduplicated(&turn, extracted).await;

        if !created.is_empty() {
            self.summaries
                .delete(&summary_cache_key(&turn.request.context_id));
            tracing::info!(
                context_id = %turn.request.context_id,
                created = created.len(),
                "invalidated summary cache after flow creation"
            );
            emit(tx, ChatEvent::FlowsExtracted { flows: created }).await;
        }

        emit(tx, ChatEvent::Done {}).await;
    }

    fn spawn_provider_stream(&self, turn: &PreparedTurn) -> mpsc::Receiver<ChunkEvent> {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        let client = self.client.clone();
        let messages = turn.request.messages.clone();
        let context_id = turn.request.context_id.clone();
        let context_name = turn.context_name.clone();
        let tools: Vec<ToolDefinition> = self.tools.definitions().to_vec();
        let available_flows = turn.available_flows.clone();

        tokio::spawn(async move {
            let request = ChatStreamRequest {
                messages: &messages,
                context_id: &context_id,
                context_name: Some(&context_name),
                tools: Some(&tools),
                available_flows: Some(&available_flows),
            };
            if let Err(e) = client.stream_chat(request, chunk_tx.clone()).await {
                tracing::warn!("LLM streaming request failed: {e}");
                let _ = chunk_tx
                    .send(ChunkEvent::Error(ProviderError::Upstream(e.to_string())))
                    .await;
            }
        });

        chunk_rx
    }

    async fn persist_assistant_reply(&self, turn: &PreparedTurn, full_response: &str) {
        let content = match MessageContent::new(full_response) {
            Ok(content) => content,
            Err(ContentError::Empty) => return,
            Err(e) => {
                tracing::warn!(error = %e, "assistant reply not persistable");
                return;
            }
        };

        if let Err(e) = self
            .conversations
            .append_message(
                &turn.conversation_id,
                Message::assistant(content),
                &turn.user_id,
            )
            .await
        {
            tracing::error!(
                conversation_id = %turn.conversation_id,
                error = %e,
                "failed to append assistant message"
            );
        }
    }

    /// Run extraction over the latest exchange, unless this turn's intent
    /// was already handled by a tool or no new user message landed.
    async fn extract_candidates(
        &self,
        turn: &PreparedTurn,
        tools_executed: bool,
        full_response: &str,
    ) -> Vec<flowdeck_types::FlowDraft> {
        if tools_executed {
            tracing::info!("skipping flow extraction: tools already handled the actions");
            return Vec::new();
        }
        if !turn.user_message_added {
            tracing::info!("skipping flow extraction: no new user message this turn");
            return Vec::new();
        }
        let Some(latest_user) = &turn.latest_user_content else {
            return Vec::new();
        };

        // Only the latest exchange; analyzing the whole history would
        // re-extract tasks already handled in earlier turns.
        let conversation_text = format!("user: {latest_user}\nassistant: {full_response}");

        match ExtractionEngine::new(self.client)
            .extract(&conversation_text, &turn.request.context_id)
            .await
        {
            Ok(drafts) => {
                tracing::info!(count = drafts.len(), "extracted candidate flows");
                drafts
            }
            Err(e) => {
                tracing::warn!("flow extraction failed (non-fatal): {e}");
                Vec::new()
            }
        }
    }

    /// Persist candidates that survive the dismissal cache and the visible
    /// title set. Titles created here join the set immediately, so two
    /// same-titled candidates in one batch produce one flow.
    async fn create_deduplicated(
        &self,
        turn: &PreparedTurn,
        drafts: Vec<flowdeck_types::FlowDraft>,
    ) -> Vec<flowdeck_types::Flow> {
        let mut title_keys = turn.existing_title_keys.clone();
        let mut created = Vec::new();

        for draft in drafts {
            let key = normalize_title(draft.title.as_str());

            let dismissed = self
                .dismissals
                .get(&dismissal_cache_key(&turn.request.context_id, &key))
                .is_some();
            if dismissed {
                tracing::info!(title = %draft.title, "skipping flow (recently dismissed)");
                continue;
            }

            if title_keys.contains(&key) {
                tracing::info!(title = %draft.title, "skipping flow (already exists in context)");
                continue;
            }

            match self.flows.create(&turn.user_id, draft).await {
                Ok(flow) => {
                    title_keys.insert(key);
                    created.push(flow);
                }
                Err(e) => tracing::error!("failed to create flow: {e}"),
            }
        }

        created
    }
}

async fn emit(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    // A closed channel means the client went away; server-side effects are
    // already durable, so sends are fire-and-forget.
    let _ = tx.send(event).await;
}

fn parse_tool_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::error!(%e, "failed to parse tool arguments, substituting empty object");
        Value::Object(serde_json::Map::new())
    })
}

fn tool_result_line(result: &ToolOutcome) -> String {
    if result.success {
        format!(
            "\n\n✓ {}",
            result.message.as_deref().unwrap_or("Action completed")
        )
    } else {
        format!(
            "\n\n✗ {}",
            result.error.as_deref().unwrap_or("Action failed")
        )
    }
}

fn provider_error_frame(err: &ProviderError) -> ChatEvent {
    let (message, code) = match err {
        ProviderError::RateLimited(_) => (
            "AI service rate limit exceeded",
            StreamErrorCode::RateLimited,
        ),
        ProviderError::Timeout(_) => ("AI service timed out", StreamErrorCode::ProviderTimeout),
        ProviderError::Upstream(_) => (
            "AI service temporarily unavailable",
            StreamErrorCode::AiServiceError,
        ),
    };
    ChatEvent::Error {
        message: message.to_string(),
        code,
    }
}
