// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use corvus_config::{RuntimeMode, ToolCapability};

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model, already parsed from the
/// raw JSON-argument string carried by a `corvus_model::ToolCall`.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message
    /// rather than an `Err` from the runtime).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: content.into(), is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), content: msg.into(), is_error: true }
    }
}

/// Describes the shape of a tool's text output for context-aware truncation.
///
/// When a tool result exceeds the configured token cap, the runtime uses this
/// category to pick the right extraction strategy. Each tool declares its own
/// category; the runtime never hard-codes tool names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the first 60 + last 40 lines so both
    /// the command preamble and the final result are visible.
    HeadTail,
    /// Ordered match list: keep the leading matches so the model sees the
    /// highest-relevance results first.
    MatchList,
    /// File content: keep a head and tail window with a separator so the
    /// model sees both the top of the file and the end.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters, rendered in the OpenAI function-calling
    /// envelope.
    fn parameters_schema(&self) -> Value;
    /// Default approval level for this tool.
    fn default_policy(&self) -> ApprovalPolicy;
    /// The hierarchy positions in which this tool is available. Default: both
    /// parent and child agents. A tool restricted to `&[RuntimeMode::Parent]`
    /// is stripped from a delegated sub-agent's registry.
    fn allowed_modes(&self) -> &[RuntimeMode] {
        &[RuntimeMode::Parent, RuntimeMode::Child]
    }
    /// What kind of effect this tool has on the outside world. Drives
    /// Operation-Mode filtering/promotion; never inferred from the tool's
    /// name.
    fn capability(&self) -> ToolCapability {
        ToolCapability::Other
    }
    /// Describes the shape of this tool's output for context-aware
    /// truncation. The default is [`OutputCategory::Generic`] (hard
    /// truncation).
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Mutual-exclusion key honoured by the executor across in-flight calls
    /// within a turn (e.g. shell execution, to keep two subprocesses from
    /// corrupting a shared working directory). `None` means no exclusion.
    fn mutex_key(&self) -> Option<&str> {
        None
    }
    /// Execute the tool. Errors should be wrapped in [`ToolOutput::err`]
    /// rather than returned as `Err` -- a tool failure is data, not a fault.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}
