//! Wire-level types shared by every `LLMProvider` implementation.
//!
//! `Message` carries either a single text body or a list of [`ContentBlock`]s
//! (used once an assistant turn attaches tool calls, or a tool turn reports a
//! result). Providers translate between this shape and their own wire format
//! in `ai::providers::*`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation (spec.md §3 "Message").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single content block inside a `Message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// The body of a [`Message`] — either plain text or a list of content blocks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten to a plain-text approximation, used for char-budget accounting
    /// and for providers with no native tool-call representation.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::ToolUse { name, input, .. } => {
                        format!("[tool_use {name}: {input}]")
                    }
                    ContentBlock::ToolResult {
                        content, is_error, ..
                    } => {
                        let prefix = if *is_error { "✗" } else { "✓" };
                        format!("{prefix} {content}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn len_chars(&self) -> usize {
        self.as_text().len()
    }
}

/// A single message in a transient, one-agent-loop conversation (spec.md §3).
///
/// Messages are never persisted directly — only the last 6 survive a
/// failover carryover (§4.2), and only the final text is folded into a
/// persisted [`crate::agent::turns::ConversationTurn`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: MessageContent,
    /// Tool calls the assistant requested in this turn (parallel to `content`
    /// for providers that separate the two).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    /// For a `Tool` role message, the id of the tool call it answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallDelta>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        let id = tool_call_id.into();
        Self {
            role: MessageRole::Tool,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: content.into(),
                is_error,
            }]),
            tool_calls: Vec::new(),
            tool_call_id: Some(id),
        }
    }

    pub fn char_len(&self) -> usize {
        self.content.len_chars()
            + self
                .tool_calls
                .iter()
                .map(|t| t.name.len() + t.arguments.to_string().len())
                .sum::<usize>()
    }
}

/// A structured tool-call delta extracted from a provider response (spec.md
/// §6 "LLMProvider ... must surface structured tool-call deltas").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDelta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Provider-specific echo fields that must be threaded back verbatim on
    /// the next turn (e.g. Gemini's `thought_signature`). Opaque to the loop.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_extra: HashMap<String, Value>,
}

/// A tool definition passed to the provider so it can emit matching tool
/// calls (spec.md §3 "Tool schema").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Request for LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_tokens);
        self
    }
}

/// Token usage + cost accounting for a single completion (spec.md §3 "Cost history").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// USD cost of this single call, computed from the provider's per-model rate.
    pub cost_usd: f64,
}

/// Response from LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallDelta>,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub is_final: bool,
    pub finish_reason: Option<String>,
    /// Populated only on the final chunk.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("x").role, MessageRole::System);
        assert_eq!(Message::user("x").role, MessageRole::User);
        assert_eq!(Message::assistant("x").role, MessageRole::Assistant);
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("call_1", "ok", false);
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.content.as_text().contains("ok"));
    }

    #[test]
    fn content_as_text_flattens_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text {
                text: "hello".into(),
            },
            ContentBlock::ToolUse {
                id: "1".into(),
                name: "search".into(),
                input: serde_json::json!({"q": "x"}),
            },
        ]);
        let text = content.as_text();
        assert!(text.contains("hello"));
        assert!(text.contains("search"));
    }

    #[test]
    fn completion_request_builder() {
        let req = CompletionRequest::new("m", "sys", vec![Message::user("hi")])
            .with_temperature(0.5)
            .with_max_tokens(100);
        assert_eq!(req.temperature, Some(0.5));
        assert_eq!(req.max_output_tokens, Some(100));
    }
}
