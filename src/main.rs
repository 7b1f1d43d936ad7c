// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use async_trait::async_trait;
use serde_json::Value;

use cli::{Cli, Commands};
use corvus_config::{AgentConfig, RuntimeConfig, RuntimeMode, ToolsConfig};
use corvus_core::{Agent, CancelToken, PermissionCallback, SessionManager, SubAgentTool};
use corvus_model::{MockProvider, ModelProvider};
use corvus_tools::{
    BashTool, DeleteFileTool, EditFileTool, GrepTool, ListDirTool, ReadFileTool, ToolEvent, ToolPolicy,
    ToolRegistry, TodoWriteTool, WriteTool,
};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a terminal coding assistant. Work directly against the repository the user points \
     you at, use tools rather than guessing, and give a concise final answer when done.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Some(Commands::Completions { shell }) => {
            cli::print_completions(*shell);
            return Ok(());
        }
        Some(Commands::ShowConfig) => {
            let config = corvus_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            return Ok(());
        }
        _ => {}
    }

    let mut config = corvus_config::load(cli.config.as_deref())?;

    let (prompt, system_prompt) = match &cli.command {
        Some(Commands::Run { prompt, mode, max_turns, system_prompt }) => {
            if let Some(mode) = mode {
                config.agent.operation_mode = *mode;
            }
            if let Some(max_turns) = max_turns {
                config.agent.max_turns = *max_turns;
            }
            (prompt.clone(), system_prompt.clone())
        }
        None => (None, None),
        Some(_) => unreachable!("Completions/ShowConfig handled above"),
    };

    let prompt = match prompt {
        Some(p) => p,
        None => read_stdin_prompt()?,
    };

    run_once(config, prompt, system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())).await
}

/// Wires one agent around the given configuration and drives `prompt` through
/// the ReAct loop to completion, printing the final reply to stdout.
///
/// There is no concrete network-backed [`ModelProvider`] wired in here --
/// that adapter is an external collaborator of the runtime, not part of it --
/// so this binary drives itself with the deterministic [`MockProvider`]. A
/// host embedding this runtime against a real backend swaps the provider at
/// this exact construction point and nowhere else.
async fn run_once(config: RuntimeConfig, prompt: String, system_prompt: String) -> anyhow::Result<()> {
    let RuntimeConfig { agent: agent_config, tools: tools_config } = config;

    let session_manager = Arc::new(SessionManager::new(agent_config.event_queue_capacity));
    let permission: Arc<dyn PermissionCallback> = Arc::new(StdinPermission);
    let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider);
    let cancel = CancelToken::new();

    warn!("no concrete LLM provider adapter is wired in; running against the deterministic mock provider");

    let root_session = session_manager.create(None, RuntimeMode::Parent, chrono::Utc::now())?;

    let registry = build_registry(
        provider.clone(),
        tools_config.clone(),
        permission.clone(),
        session_manager.clone(),
        agent_config.clone(),
        root_session.id.clone(),
        cancel.clone(),
    );

    let mut agent = Agent::with_session(
        root_session,
        agent_config,
        provider,
        registry,
        ToolPolicy::from_config(&tools_config),
        permission,
        session_manager,
        system_prompt,
        cancel,
    )?;

    info!(session_id = agent.session_id(), "starting run");
    let reply = agent.run(prompt).await?;
    println!("{reply}");
    Ok(())
}

/// Assembles the tool registry a root (parent) agent is offered. The
/// `sub_agent` tool's own child registry is a separate, narrower copy built
/// first -- it genuinely lacks `sub_agent` and `todo_write`, rather than
/// merely having them filtered out by [`RuntimeMode`] -- matching the
/// delegation tool's own description ("its own tool registry, minus
/// delegation itself").
#[allow(clippy::too_many_arguments)]
fn build_registry(
    provider: Arc<dyn ModelProvider>,
    tools_config: ToolsConfig,
    permission: Arc<dyn PermissionCallback>,
    session_manager: Arc<SessionManager>,
    agent_config: AgentConfig,
    root_session_id: String,
    cancel: CancelToken,
) -> Arc<ToolRegistry> {
    let mut base = ToolRegistry::new();
    base.register(ReadFileTool).expect("read_file registers exactly once");
    base.register(WriteTool).expect("write registers exactly once");
    base.register(EditFileTool).expect("edit_file registers exactly once");
    base.register(DeleteFileTool).expect("delete_file registers exactly once");
    base.register(ListDirTool).expect("list_dir registers exactly once");
    base.register(GrepTool).expect("grep registers exactly once");
    base.register(BashTool::default()).expect("bash registers exactly once");

    let (todo_tx, todo_rx) = mpsc::channel(32);
    let todos = Arc::new(Mutex::new(Vec::new()));
    base.register(TodoWriteTool::new(todos, todo_tx)).expect("todo_write registers exactly once");
    let base = Arc::new(base);
    log_todo_events(todo_rx);

    let sub_agent = SubAgentTool::new(
        provider,
        base.clone(),
        tools_config,
        permission,
        session_manager,
        agent_config,
        root_session_id,
        cancel,
    );

    let mut full = ToolRegistry::new();
    full.merge(&base);
    full.register(sub_agent).expect("sub_agent registers exactly once");
    Arc::new(full)
}

/// Drains `todo_write` updates on a background task so the tool never blocks
/// on a full channel; a headless run has nowhere richer than the log to put
/// them.
fn log_todo_events(mut rx: mpsc::Receiver<ToolEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let ToolEvent::TodoUpdate(items) = event;
            info!(count = items.len(), "todo list updated");
        }
    });
}

fn read_stdin_prompt() -> anyhow::Result<String> {
    use std::io::Read;
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        anyhow::bail!("no prompt given: pass one as an argument or pipe it to stdin");
    }
    Ok(buf)
}

/// Approves/denies `Ask`-policy tool calls by prompting on stderr and reading
/// a line from stdin. Treat this as one concrete renderer for the
/// [`PermissionCallback`] interface, not a model for how every host should do
/// it -- a TUI or bot integration implements the same trait differently.
struct StdinPermission;

#[async_trait]
impl PermissionCallback for StdinPermission {
    async fn ask(&self, tool_name: &str, args: &Value) -> bool {
        let prompt = format!("allow {tool_name}({args})? [y/N] ");
        tokio::task::spawn_blocking(move || {
            eprint!("{prompt}");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return false;
            }
            matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
