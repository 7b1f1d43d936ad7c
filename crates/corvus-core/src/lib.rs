// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod bus;
mod cancel;
mod error;
mod exec_log;
mod executor;
mod memory;
mod permission;
mod session_manager;
mod sub_agent;

pub use agent::Agent;
pub use bus::{BusMessage, Event, EventBus, EventType};
pub use cancel::CancelToken;
pub use error::AgentError;
pub use exec_log::{ExecutionLog, ExecutionStatus, FailureCategory, FileAccess, TerminationCause, ToolExecution, categorize};
pub use executor::{smart_truncate, DispatchResult, ToolExecutor};
pub use memory::MemoryWindow;
pub use permission::{AutoApprove, AutoDeny, PermissionCallback};
pub use session_manager::{AgentState, Session, SessionManager};
pub use sub_agent::SubAgentTool;
