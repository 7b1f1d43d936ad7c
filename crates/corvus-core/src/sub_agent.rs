// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use corvus_config::{AgentConfig, RuntimeMode, ToolCapability, ToolsConfig};
use corvus_model::ModelProvider;
use corvus_tools::{ApprovalPolicy, OutputCategory, Tool, ToolCall, ToolOutput, ToolPolicy, ToolRegistry};

use crate::agent::Agent;
use crate::bus::{Event, EventType};
use crate::cancel::CancelToken;
use crate::exec_log::{categorize, ExecutionLog, ExecutionStatus, TerminationCause};
use crate::permission::PermissionCallback;
use crate::session_manager::SessionManager;

const CHILD_SYSTEM_PROMPT: &str = "You are a sub-agent delegated a single focused task. \
    Work until it is done or you determine it cannot be completed, then give a concise final answer. \
    You have no further sub-agents to delegate to.";

/// Delegates a task to a fresh child agent and waits for it to finish, fail,
/// or time out. Always returns a structured [`ExecutionLog::report`] as a
/// successful [`ToolOutput`] -- a delegated run going badly is information
/// for the parent, not an executor-level tool failure.
///
/// Restricted to [`RuntimeMode::Parent`]: a child cannot delegate a
/// grandchild, enforced independently by [`SessionManager::create`].
pub struct SubAgentTool {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    tools_config: ToolsConfig,
    permission: Arc<dyn PermissionCallback>,
    session_manager: Arc<SessionManager>,
    config: AgentConfig,
    parent_session_id: String,
    parent_cancel: CancelToken,
}

impl SubAgentTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        tools_config: ToolsConfig,
        permission: Arc<dyn PermissionCallback>,
        session_manager: Arc<SessionManager>,
        config: AgentConfig,
        parent_session_id: impl Into<String>,
        parent_cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            registry,
            tools_config,
            permission,
            session_manager,
            config,
            parent_session_id: parent_session_id.into(),
            parent_cancel,
        }
    }

    fn publish_to_parent(&self, event_type: EventType) {
        self.session_manager.publish(Event {
            event_type,
            session_id: self.parent_session_id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn invalid_task_report(&self, reason: &str) -> String {
        let log = ExecutionLog::new("n/a", Some(self.parent_session_id.clone()), Utc::now());
        let cause = TerminationCause::InvalidTask(reason.to_string());
        let category = categorize(&log, &cause);
        log.report(Utc::now(), ExecutionStatus::Failed, "", Some((category, reason)))
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "sub_agent"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a fresh sub-agent and wait for its result. \
         The sub-agent gets its own tool registry (minus delegation itself) and context \
         window; it cannot see this conversation beyond the prompt given here. Use it to \
         parallelize-by-hand or to keep an exploratory sub-task's noise out of the main \
         transcript. Returns a structured report, not a raw reply -- read its `status` and \
         `category` fields before trusting `---`-delimited final text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The self-contained task for the sub-agent to perform"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Overrides the default delegation timeout for this call"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn allowed_modes(&self) -> &[RuntimeMode] {
        &[RuntimeMode::Parent]
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability::Other
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => return ToolOutput::ok(&call.id, self.invalid_task_report("`prompt` was empty or missing")),
        };
        let timeout_secs = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.config.delegation_timeout_secs);

        let child_cancel = CancelToken::new();
        self.parent_cancel.link_child(child_cancel.clone());

        let policy = ToolPolicy::from_config(&self.tools_config);
        let mut agent = match Agent::new(
            self.config.clone(),
            self.provider.clone(),
            self.registry.clone(),
            policy,
            self.permission.clone(),
            self.session_manager.clone(),
            RuntimeMode::Child,
            Some(&self.parent_session_id),
            CHILD_SYSTEM_PROMPT,
            child_cancel,
        ) {
            Ok(agent) => agent,
            Err(err) => return ToolOutput::ok(&call.id, self.invalid_task_report(&err.to_string())),
        };

        let child_session_id = agent.session_id().to_string();
        self.publish_to_parent(EventType::DelegationStarted { child_session_id: child_session_id.clone() });

        let outcome = match tokio::time::timeout(Duration::from_secs(timeout_secs), agent.run(prompt)).await {
            Ok(Ok(final_text)) => {
                let report = agent.execution_log().report(Utc::now(), ExecutionStatus::Completed, &final_text, None);
                ToolOutput::ok(&call.id, report)
            }
            Ok(Err(err)) => {
                let log = agent.execution_log();
                let cause = TerminationCause::RuntimeError(err.to_string());
                let category = categorize(log, &cause);
                let report = log.report(Utc::now(), ExecutionStatus::Failed, "", Some((category, &err.to_string())));
                ToolOutput::ok(&call.id, report)
            }
            Err(_elapsed) => {
                agent.cancel_token().cancel();
                let log = agent.execution_log();
                let category = categorize(log, &TerminationCause::Timeout);
                let report = log.report(Utc::now(), ExecutionStatus::Timeout, "", Some((category, "delegation exceeded its timeout")));
                ToolOutput::ok(&call.id, report)
            }
        };

        self.publish_to_parent(EventType::DelegationEnded { child_session_id });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait as at;
    use corvus_model::ScriptedMockProvider;
    use corvus_tools::ToolCall as RegistryToolCall;

    use super::*;
    use crate::permission::AutoApprove;

    struct EchoTool;

    #[at]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo_tool"
        }
        fn description(&self) -> &str {
            "echoes its text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } }, "required": ["text"] })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &RegistryToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, call.args.get("text").and_then(|v| v.as_str()).unwrap_or(""))
        }
    }

    fn tool_with(provider: ScriptedMockProvider, registry: ToolRegistry) -> (SubAgentTool, Arc<SessionManager>, String) {
        tool_with_provider(Arc::new(provider), registry)
    }

    fn tool_with_provider(
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
    ) -> (SubAgentTool, Arc<SessionManager>, String) {
        let session_manager = Arc::new(SessionManager::new(64));
        let parent = session_manager.create(None, RuntimeMode::Parent, Utc::now()).unwrap();
        let tool = SubAgentTool::new(
            provider,
            Arc::new(registry),
            ToolsConfig::default(),
            Arc::new(AutoApprove),
            session_manager.clone(),
            AgentConfig::default(),
            parent.id.clone(),
            CancelToken::new(),
        );
        (tool, session_manager, parent.id)
    }

    fn call(args: Value) -> RegistryToolCall {
        RegistryToolCall { id: "c1".into(), name: "sub_agent".into(), args }
    }

    #[tokio::test]
    async fn missing_prompt_is_reported_as_invalid_task_without_delegating() {
        let (tool, _mgr, _parent) = tool_with(ScriptedMockProvider::always_text("unused"), ToolRegistry::new());
        let out = tool.execute(&call(json!({}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("status: failed"));
        assert!(out.content.contains("category: INVALID_TASK"));
    }

    #[tokio::test]
    async fn successful_delegation_reports_completed_status_and_final_text() {
        let (tool, _mgr, parent_id) =
            tool_with(ScriptedMockProvider::always_text("the sub-task is done"), ToolRegistry::new());
        let out = tool.execute(&call(json!({ "prompt": "do a thing" }))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("status: completed"));
        assert!(out.content.contains(&format!("parent_id: {parent_id}")));
        assert!(out.content.ends_with("the sub-task is done"));
    }

    #[tokio::test]
    async fn delegated_tool_call_is_recorded_in_the_child_report() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let provider = ScriptedMockProvider::tool_then_text("t1", "echo_tool", r#"{"text":"hi"}"#, "done");
        let (tool, _mgr, _parent) = tool_with(provider, registry);
        let out = tool.execute(&call(json!({ "prompt": "echo hi" }))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("tools: echo_tool: 1x"));
    }

    struct SlowProvider;

    #[at]
    impl ModelProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }
        fn model_name(&self) -> &str {
            "slow-model"
        }
        async fn complete_streaming(&self, _req: corvus_model::CompletionRequest) -> anyhow::Result<corvus_model::ResponseStream> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Box::pin(futures::stream::iter(vec![Ok(corvus_model::ResponseEvent::Done)])))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_without_an_error_result() {
        let (tool, _mgr, _parent) = tool_with_provider(Arc::new(SlowProvider), ToolRegistry::new());
        let out = tool.execute(&call(json!({ "prompt": "go", "timeout_secs": 1 }))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("status: timeout"));
        assert!(out.content.contains("category: TIMEOUT"));
    }

    #[tokio::test]
    async fn delegation_announces_start_and_end_on_the_parents_session() {
        let (tool, mgr, parent_id) = tool_with(ScriptedMockProvider::always_text("done"), ToolRegistry::new());
        let mut rx = mgr.subscribe();
        tool.execute(&call(json!({ "prompt": "go" }))).await;

        let mut saw_started = false;
        let mut saw_ended = false;
        while let Ok(msg) = rx.try_recv() {
            let crate::bus::BusMessage::Event(event) = msg else { continue };
            if event.session_id != parent_id {
                continue;
            }
            match event.event_type {
                EventType::DelegationStarted { .. } => {
                    assert!(!saw_ended, "started must precede ended");
                    saw_started = true;
                }
                EventType::DelegationEnded { .. } => saw_ended = true,
                _ => {}
            }
        }
        assert!(saw_started && saw_ended, "expected both delegation_started and delegation_ended");
    }

    #[test]
    fn restricted_to_parent_hierarchy() {
        let tool = SubAgentTool::new(
            Arc::new(ScriptedMockProvider::always_text("x")),
            Arc::new(ToolRegistry::new()),
            ToolsConfig::default(),
            Arc::new(AutoApprove),
            Arc::new(SessionManager::new(64)),
            AgentConfig::default(),
            "parent",
            CancelToken::new(),
        );
        assert_eq!(tool.allowed_modes(), &[RuntimeMode::Parent]);
    }
}
