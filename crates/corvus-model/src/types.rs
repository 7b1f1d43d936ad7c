// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A structured request by the model to invoke a named tool with JSON
/// arguments. `id` is opaque, generated by the provider, and used solely to
/// correlate the eventual tool-role result (§3 Data Model).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the provider. The Tool Executor parses
    /// this; the Memory Window only needs its length for token accounting.
    pub arguments: String,
}

/// The atomic unit of conversation, modeled as a tagged sum type (§9 Design
/// Notes: "Messages as a sum type") rather than one struct with many
/// optional fields. This makes invariant 2 (every `Tool` message answers a
/// prior `Assistant` tool call) and the atomic tool-group eviction of §4.B
/// structural rather than validated by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool { tool_call_id: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant { content: content.into(), tool_calls }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool { tool_call_id: tool_call_id.into(), content: content.into() }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn as_text(&self) -> &str {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Tool-call id this message answers, if it is a `Tool` message.
    pub fn answers_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        }
    }

    /// Rough token estimate: 4 characters per token, floored at 1 per
    /// message, plus the serialized size of any tool calls. This is a
    /// heuristic, not a contract with any specific provider's tokenizer —
    /// §4.B explicitly allows up to a 5% overestimate in exchange for never
    /// under-counting.
    pub fn approx_tokens(&self) -> usize {
        let body_chars = self.as_text().chars().count();
        let call_chars: usize = self
            .tool_calls()
            .iter()
            .map(|c| c.name.len() + c.arguments.len())
            .sum();
        ((body_chars + call_chars) / 4).max(1)
    }
}

/// A single sparse entry in the streaming tool-call-delta accumulator (§9:
/// "model the accumulator as a sparse map keyed by the provider-reported
/// index"). `id`/`name` arrive exactly once per index; `arguments` grows by
/// concatenation and may arrive across many chunks.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl ToolCallDelta {
    /// Commit this delta into a [`ToolCall`]. Returns `None` if `id` or
    /// `name` never arrived — such a delta is dropped rather than
    /// fabricated, since the spec gives no fallback for a call missing its
    /// identity.
    pub fn finish(self) -> Option<ToolCall> {
        Some(ToolCall { id: self.id?, name: self.name?, arguments: self.arguments })
    }
}

/// One chunk of a streaming provider response, matching the OpenAI
/// streaming delta shape referenced in §6.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCall {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: u32,
        cache_write_tokens: u32,
    },
    Done,
    Error(String),
}

/// Request shape sent to a [`crate::ModelProvider`] (§6).
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// OpenAI function-calling envelope, as rendered by the Tool Registry.
    pub tools: Vec<serde_json::Value>,
    pub stream: bool,
    pub timeout_secs: Option<u64>,
}
