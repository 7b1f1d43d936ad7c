// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Signals that a provider rejected a request because the rendered prompt
/// exceeded the model's context window. A provider that can parse this out
/// of its error body should wrap one of these in the `anyhow::Error` it
/// returns from [`crate::ModelProvider::complete_streaming`] /
/// `complete_once`, so the Agent Loop can `downcast_ref` it and recover
/// (shrink the budget, compact once, retry once) instead of just failing
/// the run.
#[derive(Debug, Error)]
#[error("context window exceeded: prompt requires at least {actual_tokens} tokens")]
pub struct ContextOverflowError {
    pub actual_tokens: usize,
}
