//! Core domain types for flowdeck.
//!
//! This crate contains pure domain types with no IO and no async. Everything
//! here can be used from any layer of the application: the provider clients,
//! the storage layer, and the chat pipeline all speak these types.

mod events;
mod flow;
mod message;
mod proofs;
mod title;
mod tool;

pub use events::{ChatEvent, StreamErrorCode};
pub use flow::{Context, Flow, FlowDraft, FlowPriority, FlowSummary, FlowUpdate};
pub use message::{Conversation, Message, MessageRole};
pub use proofs::{ContentError, FlowTitle, MessageContent, TitleError};
pub use title::normalize_title;
pub use tool::{ToolDefinition, ToolOutcome};
