// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The runtime's only dependency on a concrete LLM backend.
//!
//! This crate defines the [`ModelProvider`] trait, the streaming response
//! protocol, and the message/tool-call data model the rest of the runtime
//! builds on. It ships no concrete network-facing provider -- a host binary
//! wires in whatever backend it needs -- but does ship [`MockProvider`] and
//! [`ScriptedMockProvider`] for deterministic testing.

mod error;
mod mock;
mod provider;
mod types;

pub use error::ContextOverflowError;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{InputModality, ModelProvider, ResponseStream};
pub use types::{CompletionRequest, Message, ResponseEvent, ToolCall, ToolCallDelta};
