// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors that cross the Agent Loop's public boundary.
///
/// Tool failures and recoverable provider hiccups are not represented here —
/// they flow back into the conversation as `Tool`/assistant messages (§7: "a
/// tool failure is data, not a fault"). This enum is reserved for the three
/// kinds a caller cannot recover from by inspecting a message: the provider
/// gave up, the run was cancelled, or a runtime invariant the rest of this
/// crate depends on was violated.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("run was cancelled")]
    Cancelled,

    #[error("runtime invariant violated: {0}")]
    Invariant(String),
}
