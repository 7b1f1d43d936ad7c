// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_max_turns() -> u32 {
    70
}
fn default_max_tokens() -> usize {
    100_000
}
fn default_true() -> bool {
    true
}
fn default_encoding_key() -> String {
    "cl100k_base".to_string()
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_delegation_timeout_secs() -> u64 {
    300
}
fn default_cancel_grace_secs() -> u64 {
    5
}
fn default_event_queue_capacity() -> usize {
    256
}
fn default_tool_result_token_cap() -> usize {
    4_000
}

/// Process-wide posture controlling which tools exist and which require
/// confirmation. Orthogonal to [`RuntimeMode`], which instead governs
/// hierarchy-based (parent/child) schema filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Tools run with their declared permission; no extra gating.
    #[default]
    Standard,
    /// Every write/shell-capable tool's effective permission is promoted
    /// to `ask`, regardless of its declared default.
    Safe,
    /// Every write/shell-capable tool is removed from the schema list
    /// presented to the model — a hard capability removal, not a runtime ask.
    Plan,
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationMode::Standard => write!(f, "standard"),
            OperationMode::Safe => write!(f, "safe"),
            OperationMode::Plan => write!(f, "plan"),
        }
    }
}

/// Where a tool's registry view sits in the parent/child hierarchy.
///
/// This is a *structural* axis, distinct from [`OperationMode`]: a `parent`
/// agent may still run in `plan` mode, and a `child` agent is always denied
/// `sub_agent`/`todo` regardless of the process's `OperationMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Parent,
    Child,
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Parent => write!(f, "parent"),
            RuntimeMode::Child => write!(f, "child"),
        }
    }
}

/// What a tool is capable of doing to the outside world. Drives
/// [`OperationMode`] filtering/promotion; never inferred from a tool's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolCapability {
    #[default]
    Read,
    Write,
    Shell,
    Other,
}

impl ToolCapability {
    /// Tools whose capability is gated by `safe`/`plan` Operation Modes.
    pub fn is_mutating(self) -> bool {
        matches!(self, ToolCapability::Write | ToolCapability::Shell)
    }
}

/// Construction-time configuration for a single agent instance (§6 of the
/// runtime spec: "Turn bound and memory bound" / "Operation-mode flags").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Per-run ceiling on the number of `thinking` turns. Default 70 — the
    /// source documents this inconsistently (10 vs 70); 70 is the pinned
    /// default and implementers should not go lower without justification.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Token budget for the Memory Window.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Whether the system message is exempt from trimming.
    #[serde(default = "default_true")]
    pub preserve_system: bool,
    /// Token-encoding key used for the Memory Window's estimator. Falls back
    /// to the default encoding if unrecognized.
    #[serde(default = "default_encoding_key")]
    pub encoding_key: String,
    /// Per tool-call timeout (seconds), configurable per tool at registration.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Per child-delegation timeout (seconds), overridable per `sub_agent` call.
    #[serde(default = "default_delegation_timeout_secs")]
    pub delegation_timeout_secs: u64,
    /// Grace period for a misbehaving handler to honour cancellation before
    /// being force-abandoned.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Bounded per-subscriber event queue capacity before drop-and-notify.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Token cap for a single tool result before smart truncation applies.
    /// Zero disables per-result truncation.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Process-wide safety posture.
    #[serde(default)]
    pub operation_mode: OperationMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
            preserve_system: default_true(),
            encoding_key: default_encoding_key(),
            tool_timeout_secs: default_tool_timeout_secs(),
            delegation_timeout_secs: default_delegation_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            event_queue_capacity: default_event_queue_capacity(),
            tool_result_token_cap: default_tool_result_token_cap(),
            operation_mode: OperationMode::default(),
        }
    }
}

/// Permission/approval patterns for tools, keyed by shell-style glob. Mirrors
/// the host CLI's `[tools]` config table; the core only consumes the
/// resulting [`crate::AgentConfig`]-level defaults, pattern compilation
/// happens in `corvus-tools::policy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}
