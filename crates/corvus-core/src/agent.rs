// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;
use corvus_config::{AgentConfig, OperationMode, RuntimeMode};
use corvus_model::{CompletionRequest, ContextOverflowError, Message, ModelProvider};
use corvus_tools::{ToolPolicy, ToolRegistry};

use crate::bus::{Event, EventType};
use crate::cancel::CancelToken;
use crate::error::AgentError;
use crate::exec_log::{ExecutionLog, FileAccess, ToolExecution};
use crate::executor::ToolExecutor;
use crate::permission::PermissionCallback;
use crate::session_manager::{AgentState, Session, SessionManager};

/// How many non-system messages emergency compaction keeps on a
/// context-overflow retry. Deliberately small -- this path exists to let one
/// more model call succeed, not to preserve history.
const EMERGENCY_COMPACT_KEEP: usize = 8;

/// Drives one conversational session through the turn-bounded ReAct loop:
/// send the window to the model, either return its text or run every tool
/// call it asked for and loop. A child created for `sub_agent` delegation is
/// just another `Agent` built with `RuntimeMode::Child` against the same
/// tool registry -- the registry's own mode filter is what hides
/// `sub_agent`/`todo_write` from it, not a separate code path here.
pub struct Agent {
    session: Session,
    memory: crate::memory::MemoryWindow,
    executor: ToolExecutor,
    exec_log: ExecutionLog,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn ModelProvider>,
    session_manager: Arc<SessionManager>,
    cancel: CancelToken,
    config: AgentConfig,
    mode: RuntimeMode,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        policy: ToolPolicy,
        permission: Arc<dyn PermissionCallback>,
        session_manager: Arc<SessionManager>,
        mode: RuntimeMode,
        parent_session_id: Option<&str>,
        system_prompt: impl Into<String>,
        cancel: CancelToken,
    ) -> Result<Self, AgentError> {
        let session = session_manager.create(parent_session_id, mode, Utc::now())?;
        Self::with_session(session, config, provider, registry, policy, permission, session_manager, system_prompt, cancel)
    }

    /// Builds an agent around an already-created [`Session`] instead of
    /// minting one. A host that needs to know its root agent's session id
    /// before the agent itself exists -- to hand it to a `sub_agent` tool
    /// instance that will be registered into this same agent's tool registry
    /// -- creates the session up front and wires the agent around it here.
    #[allow(clippy::too_many_arguments)]
    pub fn with_session(
        session: Session,
        config: AgentConfig,
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        policy: ToolPolicy,
        permission: Arc<dyn PermissionCallback>,
        session_manager: Arc<SessionManager>,
        system_prompt: impl Into<String>,
        cancel: CancelToken,
    ) -> Result<Self, AgentError> {
        let now = Utc::now();
        let mode = session.mode;
        let mut memory =
            crate::memory::MemoryWindow::new(config.max_tokens, config.preserve_system, config.encoding_key.clone());
        memory.set_system(system_prompt);
        let executor = ToolExecutor::new(registry.clone(), permission, policy, mode, &config);
        let exec_log = ExecutionLog::new(session.id.clone(), session.parent_id.clone(), now);
        Ok(Self { session, memory, executor, exec_log, registry, provider, session_manager, cancel, config, mode })
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn execution_log(&self) -> &ExecutionLog {
        &self.exec_log
    }

    pub fn memory(&self) -> &crate::memory::MemoryWindow {
        &self.memory
    }

    /// Run the ReAct loop to completion (a final assistant text reply with
    /// no pending tool calls), a turn-limit exhaustion, or an error.
    pub async fn run(&mut self, user_input: impl Into<String>) -> Result<String, AgentError> {
        self.memory.append(Message::user(user_input.into()));
        self.publish(EventType::UserInput(self.memory.snapshot().last().unwrap().as_text().to_string()));

        let mut turns = 0u32;
        let mut nudged = false;
        let mut overflow_retried = false;

        loop {
            if self.cancel.is_cancelled() {
                self.finish(AgentState::Failed);
                return Err(AgentError::Cancelled);
            }
            if turns >= self.config.max_turns {
                self.finish(AgentState::Failed);
                return Ok("Max turns exceeded".to_string());
            }
            turns += 1;

            self.session_manager.update_state(&self.session.id, AgentState::Thinking, Utc::now());

            let req = CompletionRequest {
                messages: self.memory.snapshot(),
                tools: tool_schemas_json(&self.registry, self.mode, self.config.operation_mode),
                stream: true,
                timeout_secs: None,
            };

            let response = match self.provider.complete_once(req).await {
                Ok(msg) => msg,
                Err(err) => {
                    if !overflow_retried {
                        if err.downcast_ref::<ContextOverflowError>().is_some() {
                            overflow_retried = true;
                            let shrunk = (self.memory.max_tokens() / 4) * 3;
                            self.memory.set_max_tokens(shrunk.max(1));
                            self.memory.emergency_compact(EMERGENCY_COMPACT_KEEP);
                            turns -= 1; // the failed attempt doesn't count as a real turn
                            continue;
                        }
                    }
                    self.finish(AgentState::Failed);
                    return Err(AgentError::Provider(err));
                }
            };

            self.memory.append(response.clone());
            if !response.as_text().is_empty() {
                self.publish(EventType::AssistantText(response.as_text().to_string()));
            }

            if !response.has_tool_calls() {
                if response.as_text().trim().is_empty() {
                    if nudged {
                        self.finish(AgentState::Completed);
                        return Ok(String::new());
                    }
                    nudged = true;
                    self.memory.append(Message::user(
                        "Your previous turn produced no text and no tool calls. Please provide a final response or call a tool.",
                    ));
                    continue;
                }
                self.finish(AgentState::Completed);
                return Ok(response.as_text().to_string());
            }

            self.session_manager.update_state(&self.session.id, AgentState::ExecutingTools, Utc::now());
            let calls = response.tool_calls().to_vec();
            for call in &calls {
                self.publish(EventType::ToolCallStarted { call_id: call.id.clone(), tool_name: call.name.clone() });
            }

            let results = self.executor.execute_batch(&calls, &self.cancel).await;

            let mut tool_messages = Vec::with_capacity(results.len());
            for (call, result) in calls.iter().zip(results.iter()) {
                self.publish(EventType::ToolCallFinished {
                    call_id: call.id.clone(),
                    tool_name: result.tool_name.clone(),
                    is_error: result.output.is_error,
                });
                self.exec_log.record(ToolExecution {
                    name: result.tool_name.clone(),
                    duration: result.duration,
                    ok: !result.output.is_error,
                    files: file_access_for(&result.tool_name, &call.arguments),
                });
                tool_messages.push(Message::tool_result(result.output.call_id.clone(), result.output.content.clone()));
            }
            self.memory.append_many(tool_messages);

            if self.cancel.is_cancelled() {
                self.finish(AgentState::Failed);
                return Err(AgentError::Cancelled);
            }
        }
    }

    fn publish(&self, event_type: EventType) {
        self.session_manager.publish(Event {
            event_type,
            session_id: self.session.id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn finish(&mut self, state: AgentState) {
        self.exec_log.finish(Utc::now());
        self.session_manager.update_state(&self.session.id, state, Utc::now());
    }
}

fn tool_schemas_json(registry: &ToolRegistry, mode: RuntimeMode, operation_mode: OperationMode) -> Vec<serde_json::Value> {
    registry
        .schemas(mode, operation_mode)
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": s.name,
                    "description": s.description,
                    "parameters": s.parameters,
                }
            })
        })
        .collect()
}

/// Best-effort file-path extraction for the Execution Log report, keyed on
/// the tool's declared name rather than any heuristic over its output. Tools
/// not in this list simply contribute no file-access entries.
fn file_access_for(tool_name: &str, raw_arguments: &str) -> Vec<(FileAccess, String)> {
    let access = match tool_name {
        "read_file" => FileAccess::Read,
        "write" => FileAccess::Written,
        "edit_file" => FileAccess::Edited,
        _ => return Vec::new(),
    };
    let Ok(args) = serde_json::from_str::<serde_json::Value>(raw_arguments) else {
        return Vec::new();
    };
    match args.get("path").and_then(|v| v.as_str()) {
        Some(path) => vec![(access, path.to_string())],
        None => Vec::new(),
    }
}
