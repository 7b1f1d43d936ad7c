// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{CompletionRequest, Message, ResponseEvent, ToolCallDelta};

/// A single input modality a provider/model combination can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputModality {
    Text,
    Image,
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The core's only dependency on a concrete LLM backend (§6 External
/// Interfaces). An implementor is free to talk to any wire protocol; the
/// core never inspects anything beyond this surface.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete_streaming(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Send a completion request and return the single assembled response.
    ///
    /// The default implementation drains [`Self::complete_streaming`] with the
    /// same accumulator the Agent Loop uses for true streaming providers —
    /// §6 only requires that *a* non-streaming mode exist, not a second
    /// independent code path.
    async fn complete_once(&self, req: CompletionRequest) -> anyhow::Result<Message> {
        let mut stream = self.complete_streaming(req).await?;
        let mut text = String::new();
        let mut thinking = String::new();
        let mut calls: std::collections::BTreeMap<u32, ToolCallDelta> =
            std::collections::BTreeMap::new();

        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::ThinkingDelta(t) => thinking.push_str(&t),
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let entry = calls.entry(index).or_default();
                    if let Some(id) = id {
                        entry.id = Some(id);
                    }
                    if let Some(name) = name {
                        entry.name = Some(name);
                    }
                    if let Some(args) = arguments {
                        entry.arguments.push_str(&args);
                    }
                }
                ResponseEvent::Usage { .. } => {}
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => anyhow::bail!(e),
            }
        }

        let tool_calls = calls
            .into_values()
            .filter_map(|d| d.finish())
            .collect::<Vec<_>>();

        Ok(if tool_calls.is_empty() {
            Message::assistant(text)
        } else {
            Message::assistant_with_tool_calls(text, tool_calls)
        })
    }

    /// Input modalities supported by this provider/model combination.
    /// Conservative default: text only, so images are never sent to a model
    /// that cannot accept them.
    fn input_modalities(&self) -> Vec<InputModality> {
        vec![InputModality::Text]
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}
