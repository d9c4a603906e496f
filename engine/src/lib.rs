//! Conversational orchestration for flowdeck.
//!
//! One chat turn flows through [`ChatPipeline`]:
//!
//! 1. `prepare` authorizes the caller against the context, resolves (or
//!    lazily creates) the conversation, and appends the new user message —
//!    all before the first SSE frame, so failures surface as plain HTTP
//!    errors.
//! 2. `stream` drives the provider, forwards text tokens, executes tool
//!    calls in-stream, persists the assembled reply, extracts candidate
//!    flows from the latest exchange, deduplicates them against visible and
//!    recently-dismissed flows, and announces what survived.
//!
//! Everything downstream of the model's output — tool arguments and
//! extraction JSON alike — is untrusted and parsed defensively.

mod extraction;
mod pipeline;
mod tools;

pub use extraction::ExtractionEngine;
pub use pipeline::{ChatError, ChatPipeline, ChatRequest, PreparedTurn};
pub use tools::ToolRegistry;
