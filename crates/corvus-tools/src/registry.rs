// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use corvus_config::{OperationMode, RuntimeMode, ToolCapability};
use thiserror::Error;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema rendered in the OpenAI function-calling envelope, kept
/// independent of the model crate so tools can be described without pulling
/// in a provider dependency.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Errors returned when registering a tool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named {0:?} is already registered")]
    DuplicateName(String),
    #[error("tool {name:?} has an invalid parameters schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

// SAFETY: ToolRegistry is Sync because:
// - HashMap<String, Arc<dyn Tool>> is Sync (String is Sync, Arc<T: Send + Sync> is Sync)
// - Tools implement Send + Sync (required by the Tool trait)
// - No interior mutability exists after construction (all methods take &self)
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Fails if a tool with the same name is already
    /// registered, or if the declared parameters schema is not a JSON object
    /// schema (the only shape the OpenAI function-calling envelope accepts).
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        let schema = tool.parameters_schema();
        if schema.get("type").and_then(|v| v.as_str()) != Some("object") {
            return Err(RegistryError::InvalidSchema {
                name,
                reason: "parameters_schema must be a JSON object schema (type: \"object\")".into(),
            });
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Merge every tool from `other` into `self`, skipping names already
    /// present. Used to build a child agent's restricted registry from a
    /// filtered copy of the parent's tools.
    pub fn merge(&mut self, other: &ToolRegistry) {
        for (name, tool) in &other.tools {
            self.tools.entry(name.clone()).or_insert_with(|| tool.clone());
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for the tools visible under `runtime_mode` /
    /// `operation_mode`: a tool must both list `runtime_mode` in its
    /// `allowed_modes`, and -- in `OperationMode::Plan` -- must not be
    /// mutating (`ToolCapability::Write` or `Shell`).
    pub fn schemas(&self, runtime_mode: RuntimeMode, operation_mode: OperationMode) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| Self::visible(t.as_ref(), runtime_mode, operation_mode))
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self, runtime_mode: RuntimeMode, operation_mode: OperationMode) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|t| Self::visible(t.as_ref(), runtime_mode, operation_mode))
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    fn visible(tool: &dyn Tool, runtime_mode: RuntimeMode, operation_mode: OperationMode) -> bool {
        if !tool.allowed_modes().contains(&runtime_mode) {
            return false;
        }
        if operation_mode == OperationMode::Plan && tool.capability().is_mutating() {
            return false;
        }
        true
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    /// All registered names, mode-unfiltered. Mostly useful for
    /// administration/debugging; prefer [`Self::names`] for what an agent
    /// should actually be offered.
    pub fn all_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
