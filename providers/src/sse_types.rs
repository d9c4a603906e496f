//! Typed SSE event structures for provider responses.
//!
//! These types enable compile-time validation of provider JSON responses.
//! Parse errors happen at the serde boundary, not scattered through parsing
//! logic.
//!
//! # Design
//!
//! Each provider module defines:
//! - The stream-chunk shape (tag-dispatched for Anthropic, positional for
//!   OpenAI chat completions)
//! - Supporting structs for nested data
//! - `#[serde(default)]` for optional fields with sensible defaults
//! - `#[serde(other)] Unknown` arms for forward compatibility

pub mod openai {
    use serde::Deserialize;

    /// One `chat.completion.chunk` payload from the stream.
    #[derive(Debug, Deserialize)]
    pub struct StreamChunk {
        #[serde(default)]
        pub choices: Vec<Choice>,
        #[serde(default)]
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        #[serde(default)]
        pub delta: Delta,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct Delta {
        #[serde(default)]
        pub content: Option<String>,
        #[serde(default)]
        pub tool_calls: Option<Vec<ToolCallDelta>>,
    }

    /// A tool-call fragment. The array `index` is the stable key across
    /// chunks; `id` and the function name typically arrive only on the
    /// first fragment for that index.
    #[derive(Debug, Deserialize)]
    pub struct ToolCallDelta {
        pub index: u32,
        #[serde(default)]
        pub id: Option<String>,
        #[serde(default)]
        pub function: Option<FunctionDelta>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct FunctionDelta {
        #[serde(default)]
        pub name: Option<String>,
        #[serde(default)]
        pub arguments: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
        #[serde(default, rename = "type")]
        pub error_type: String,
    }

    /// Non-streaming `chat.completion` response (used by extraction).
    #[derive(Debug, Deserialize)]
    pub struct CompletionResponse {
        #[serde(default)]
        pub choices: Vec<CompletionChoice>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CompletionChoice {
        pub message: CompletionMessage,
    }

    #[derive(Debug, Deserialize)]
    pub struct CompletionMessage {
        #[serde(default)]
        pub content: Option<String>,
    }

}

pub mod anthropic {
    use serde::Deserialize;

    /// Top-level Anthropic SSE event, tagged by `type` field.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Event {
        MessageStart,
        MessageDelta,
        ContentBlockStart {
            index: u32,
            content_block: ContentBlock,
        },
        ContentBlockDelta {
            index: u32,
            delta: Delta,
        },
        ContentBlockStop {
            index: u32,
        },
        MessageStop,
        /// Ping events (keepalive)
        Ping,
        Error {
            error: ErrorInfo,
        },
        /// Unknown event type - allows forward compatibility
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default, rename = "type")]
        pub error_type: String,
        #[serde(default)]
        pub message: String,
    }

    /// Content block in content_block_start.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ContentBlock {
        Text {
            #[serde(default)]
            text: String,
        },
        ToolUse {
            id: String,
            name: String,
        },
        /// Unknown block type - forward compatibility
        #[serde(other)]
        Unknown,
    }

    /// Delta in content_block_delta.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Delta {
        TextDelta {
            text: String,
        },
        InputJsonDelta {
            partial_json: String,
        },
        /// Unknown delta type - forward compatibility
        #[serde(other)]
        Unknown,
    }

    /// Non-streaming Messages API response (used by extraction).
    #[derive(Debug, Deserialize)]
    pub struct MessageResponse {
        #[serde(default)]
        pub content: Vec<ResponseBlock>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum ResponseBlock {
        Text {
            text: String,
        },
        #[serde(other)]
        Unknown,
    }

    #[cfg(test)]
    mod tests {
        use super::{ContentBlock, Delta, Event};

        #[test]
        fn deserialize_content_block_start_tool_use() {
            let json = r#"{
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "delete_flow"}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse { id, name },
                } => {
                    assert_eq!(index, 1);
                    assert_eq!(id, "toolu_1");
                    assert_eq!(name, "delete_flow");
                }
                other => panic!("wrong event: {other:?}"),
            }
        }

        #[test]
        fn deserialize_input_json_delta() {
            let json = r#"{
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"flow_id\":"}
            }"#;
            let event: Event = serde_json::from_str(json).unwrap();
            match event {
                Event::ContentBlockDelta {
                    delta: Delta::InputJsonDelta { partial_json },
                    ..
                } => assert_eq!(partial_json, "{\"flow_id\":"),
                other => panic!("wrong event: {other:?}"),
            }
        }

        #[test]
        fn unknown_event_types_do_not_fail() {
            let event: Event =
                serde_json::from_str(r#"{"type": "brand_new_event", "stuff": 1}"#).unwrap();
            assert!(matches!(event, Event::Unknown));
        }
    }
}
