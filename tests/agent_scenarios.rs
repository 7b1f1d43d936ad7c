// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Black-box end-to-end scenarios driving a whole `Agent` through its public
//! surface, the way a host binary would: build a registry, a provider, a
//! session, run one prompt to completion, inspect memory/bus/log output.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use corvus_config::{AgentConfig, OperationMode, RuntimeMode, ToolCapability, ToolsConfig};
use corvus_core::{Agent, AgentError, AutoApprove, CancelToken, SessionManager, SubAgentTool};
use corvus_model::{Message, ResponseEvent, ScriptedMockProvider};
use corvus_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput, ToolPolicy, ToolRegistry};

struct ReadFileStandIn;

#[async_trait]
impl Tool for ReadFileStandIn {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "reads a file"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "path": { "type": "string" } }, "required": ["path"] })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn capability(&self) -> ToolCapability {
        ToolCapability::Read
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "contents")
    }
}

struct SlowTool(&'static str);

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "resolves after a varying delay, to exercise out-of-order completion"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let delay_ms = match self.0 {
            "read_a" => 30,
            "read_b" => 5,
            _ => 15,
        };
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        ToolOutput::ok(&call.id, self.0)
    }
}

struct WriteStandIn;

#[async_trait]
impl Tool for WriteStandIn {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "writes a file"
    }
    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }
    fn capability(&self) -> ToolCapability {
        ToolCapability::Write
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::ok(&call.id, "wrote")
    }
}

fn new_agent(
    provider: ScriptedMockProvider,
    registry: ToolRegistry,
    config: AgentConfig,
) -> Agent {
    Agent::new(
        config,
        Arc::new(provider),
        Arc::new(registry),
        ToolPolicy::from_config(&ToolsConfig::default()),
        Arc::new(AutoApprove),
        Arc::new(SessionManager::new(64)),
        RuntimeMode::Parent,
        None,
        "You are concise.",
        CancelToken::new(),
    )
    .unwrap()
}

// Scenario 1 — single-turn chat.
#[tokio::test]
async fn single_turn_chat_completes_with_text_and_three_message_memory() {
    let mut agent = new_agent(ScriptedMockProvider::always_text("Hi."), ToolRegistry::new(), AgentConfig::default());
    let reply = agent.run("Say hi.").await.unwrap();
    assert_eq!(reply, "Hi.");

    let snapshot = agent.memory().snapshot();
    assert_eq!(snapshot.len(), 3);
    assert!(matches!(snapshot[0], Message::System { .. }));
    assert!(matches!(snapshot[1], Message::User { .. }));
    assert!(matches!(snapshot[2], Message::Assistant { .. }));
}

// Scenario 2 — one tool call round-trips through memory with a matching id.
#[tokio::test]
async fn one_tool_call_round_trips_and_final_text_cites_the_result() {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileStandIn).unwrap();
    let provider = ScriptedMockProvider::tool_then_text(
        "a",
        "read_file",
        r#"{"path":"/tmp/x"}"#,
        "The file says: contents",
    );
    let mut agent = new_agent(provider, registry, AgentConfig::default());
    let reply = agent.run("Read file /tmp/x.").await.unwrap();
    assert_eq!(reply, "The file says: contents");

    let snapshot = agent.memory().snapshot();
    assert_eq!(snapshot.len(), 5, "system, user, assistant(tool_call), tool, assistant");
    let Message::Assistant { tool_calls, .. } = &snapshot[2] else { panic!("expected assistant with tool call") };
    assert_eq!(tool_calls[0].id, "a");
    let Message::Tool { tool_call_id, content } = &snapshot[3] else { panic!("expected tool result") };
    assert_eq!(tool_call_id, "a");
    assert_eq!(content, "contents");
}

// Scenario 3 — parallel tool calls complete out of order but are appended to
// memory in original call order, each tagged with its own call id.
#[tokio::test]
async fn parallel_tool_calls_preserve_call_order_in_memory_despite_out_of_order_completion() {
    let mut registry = ToolRegistry::new();
    registry.register(SlowTool("read_a")).unwrap();
    registry.register(SlowTool("read_b")).unwrap();
    registry.register(SlowTool("read_c")).unwrap();

    let provider = ScriptedMockProvider::new(vec![
        vec![
            ResponseEvent::ToolCall { index: 0, id: Some("a".into()), name: Some("read_a".into()), arguments: Some("{}".into()) },
            ResponseEvent::ToolCall { index: 1, id: Some("b".into()), name: Some("read_b".into()), arguments: Some("{}".into()) },
            ResponseEvent::ToolCall { index: 2, id: Some("c".into()), name: Some("read_c".into()), arguments: Some("{}".into()) },
            ResponseEvent::Done,
        ],
        vec![ResponseEvent::TextDelta("all three ran".into()), ResponseEvent::Done],
    ]);

    let mut agent = new_agent(provider, registry, AgentConfig::default());
    let reply = agent.run("read a, b, and c").await.unwrap();
    assert_eq!(reply, "all three ran");

    let snapshot = agent.memory().snapshot();
    let tool_messages: Vec<&Message> = snapshot.iter().filter(|m| matches!(m, Message::Tool { .. })).collect();
    assert_eq!(tool_messages.len(), 3);
    let ids: Vec<&str> = tool_messages.iter().map(|m| m.answers_call_id().unwrap()).collect();
    assert_eq!(ids, vec!["a", "b", "c"], "append order must match call order, not completion order");
}

// Scenario 4 — turn bound, exact literal marker and exact memory length.
#[tokio::test]
async fn turn_bound_is_honoured_with_exact_message_count() {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileStandIn).unwrap();

    let max_turns = 3;
    let mut scripts = Vec::new();
    for _ in 0..(max_turns + 1) {
        scripts.push(vec![
            ResponseEvent::ToolCall { index: 0, id: Some("x".into()), name: Some("read_file".into()), arguments: Some(r#"{"path":"/tmp/x"}"#.into()) },
            ResponseEvent::Done,
        ]);
    }
    let provider = ScriptedMockProvider::new(scripts);

    let mut config = AgentConfig::default();
    config.max_turns = max_turns;
    let mut agent = new_agent(provider, registry, config);
    let reply = agent.run("go").await.unwrap();
    assert_eq!(reply, "Max turns exceeded");

    let snapshot = agent.memory().snapshot();
    // system + user + (assistant, tool) * max_turns
    assert_eq!(snapshot.len(), 1 + 1 + (max_turns as usize) * 2);
}

// Scenario 7 — plan mode filter, hallucinated write call is indistinguishable
// from an unknown tool name.
#[tokio::test]
async fn plan_mode_hides_mutating_tools_and_rejects_a_hallucinated_write_call() {
    let mut registry = ToolRegistry::new();
    registry.register(WriteStandIn).unwrap();
    registry.register(ReadFileStandIn).unwrap();

    let mut config = AgentConfig::default();
    config.operation_mode = OperationMode::Plan;

    let schemas = registry.schemas(RuntimeMode::Parent, config.operation_mode);
    assert!(schemas.iter().all(|s| s.name != "write_file"));
    assert!(schemas.iter().any(|s| s.name == "read_file"));

    let provider = ScriptedMockProvider::tool_then_text("w1", "write_file", "{}", "never reached directly");
    let mut agent = new_agent(provider, registry, config);
    let reply = agent.run("please write something").await.unwrap();
    assert_eq!(reply, "never reached directly");

    let snapshot = agent.memory().snapshot();
    let tool_msg = snapshot.iter().find(|m| matches!(m, Message::Tool { .. })).unwrap();
    assert_eq!(tool_msg.as_text(), "Error: Unknown tool 'write_file'");
}

// Scenario 5 — child delegation happy path, driven at the cross-crate level
// through the real `sub_agent` tool rather than a registry test double.
#[tokio::test]
async fn delegation_happy_path_reports_completed_status_with_tool_usage_and_bus_order() {
    let session_manager = Arc::new(SessionManager::new(64));
    let root = session_manager.create(None, RuntimeMode::Parent, Utc::now()).unwrap();
    let mut rx = session_manager.subscribe();

    let mut child_registry = ToolRegistry::new();
    child_registry.register(ReadFileStandIn).unwrap();
    let child_registry = Arc::new(child_registry);

    let provider = ScriptedMockProvider::tool_then_text(
        "r1",
        "read_file",
        r#"{"path":"foo.txt"}"#,
        "42",
    );
    let provider: Arc<dyn corvus_model::ModelProvider> = Arc::new(provider);

    let sub_agent = SubAgentTool::new(
        provider,
        child_registry,
        ToolsConfig::default(),
        Arc::new(AutoApprove),
        session_manager.clone(),
        AgentConfig::default(),
        root.id.clone(),
        CancelToken::new(),
    );

    let out = sub_agent
        .execute(&ToolCall { id: "d1".into(), name: "sub_agent".into(), args: json!({ "prompt": "count lines of foo.txt" }) })
        .await;

    assert!(!out.is_error);
    assert!(out.content.contains("status: completed"));
    assert!(out.content.contains("read_file: 1x"));
    assert!(out.content.ends_with("42"));

    let mut saw_delegation_started = false;
    let mut saw_delegation_ended = false;
    while let Ok(msg) = rx.try_recv() {
        let corvus_core::BusMessage::Event(event) = msg else { continue };
        match event.event_type {
            corvus_core::EventType::DelegationStarted { .. } if event.session_id == root.id => {
                saw_delegation_started = true;
            }
            corvus_core::EventType::DelegationEnded { .. } if event.session_id == root.id => {
                assert!(saw_delegation_started, "ended must follow started");
                saw_delegation_ended = true;
            }
            _ => {}
        }
    }
    assert!(saw_delegation_started && saw_delegation_ended);
}

// Scenario 6 — child timeout surfaces a structured, non-error report, and the
// parent can keep going afterward.
#[tokio::test(start_paused = true)]
async fn delegation_timeout_yields_structured_report_and_parent_keeps_running() {
    struct NeverRespondingProvider;

    #[async_trait]
    impl corvus_model::ModelProvider for NeverRespondingProvider {
        fn name(&self) -> &str {
            "never"
        }
        fn model_name(&self) -> &str {
            "never-model"
        }
        async fn complete_streaming(&self, _req: corvus_model::CompletionRequest) -> anyhow::Result<corvus_model::ResponseStream> {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            Ok(Box::pin(futures::stream::iter(vec![Ok(ResponseEvent::Done)])))
        }
    }

    let session_manager = Arc::new(SessionManager::new(64));
    let root = session_manager.create(None, RuntimeMode::Parent, Utc::now()).unwrap();

    let sub_agent = SubAgentTool::new(
        Arc::new(NeverRespondingProvider),
        Arc::new(ToolRegistry::new()),
        ToolsConfig::default(),
        Arc::new(AutoApprove),
        session_manager.clone(),
        AgentConfig::default(),
        root.id.clone(),
        CancelToken::new(),
    );

    let out = sub_agent
        .execute(&ToolCall { id: "d2".into(), name: "sub_agent".into(), args: json!({ "prompt": "go", "timeout_secs": 1 }) })
        .await;

    assert!(!out.is_error, "a delegation timeout is reported data, never an executor fault");
    assert!(out.content.contains("status: timeout"));
    assert!(out.content.contains("category: TIMEOUT"));

    // The parent's own loop is unaffected by a child timing out.
    let mut parent = new_agent(ScriptedMockProvider::always_text("still fine"), ToolRegistry::new(), AgentConfig::default());
    let reply = parent.run("keep going").await.unwrap();
    assert_eq!(reply, "still fine");
}

// Invariant 5 — a child's registry view never contains `sub_agent` or
// `todo_write`, driven at the mode-filter level a host would actually use.
#[tokio::test]
async fn child_registry_view_never_offers_delegation_or_todo() {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileStandIn).unwrap();

    let sub_agent = SubAgentTool::new(
        Arc::new(ScriptedMockProvider::always_text("x")),
        Arc::new(ToolRegistry::new()),
        ToolsConfig::default(),
        Arc::new(AutoApprove),
        Arc::new(SessionManager::new(8)),
        AgentConfig::default(),
        "parent",
        CancelToken::new(),
    );
    registry.register(sub_agent).unwrap();

    let child_names = registry.names(RuntimeMode::Child, OperationMode::Standard);
    assert!(!child_names.iter().any(|n| n == "sub_agent"));

    let parent_names = registry.names(RuntimeMode::Parent, OperationMode::Standard);
    assert!(parent_names.iter().any(|n| n == "sub_agent"));
}

// Cancellation cascades through the structured-concurrency primitive: a
// cancelled agent never calls the provider again.
#[tokio::test]
async fn cancellation_stops_the_loop_before_any_further_provider_call() {
    let mut agent = new_agent(ScriptedMockProvider::always_text("unreachable"), ToolRegistry::new(), AgentConfig::default());
    agent.cancel_token().cancel();
    let err = agent.run("go").await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
}
