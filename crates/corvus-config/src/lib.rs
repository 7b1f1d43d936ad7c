// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Construction-time configuration for the agent runtime.
//!
//! Loading a config *file* is an external concern (left to the CLI/host
//! binary); this crate only defines the shape of that configuration and a
//! small loader so the host has somewhere to put YAML-on-disk support.

mod loader;
mod schema;

pub use loader::load;
pub use schema::{AgentConfig, OperationMode, RuntimeMode, ToolCapability, ToolsConfig};

/// Top-level configuration merged from on-disk layers; what [`load`] produces.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}
