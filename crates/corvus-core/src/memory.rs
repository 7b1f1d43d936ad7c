// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use corvus_model::Message;

/// Chars-per-token divisor for a configured encoding key. This is a heuristic
/// estimator, not a real tokenizer -- unrecognized keys fall back to the
/// `cl100k_base` divisor rather than erroring, since the estimate only needs
/// to be conservative, not exact.
fn chars_per_token(encoding_key: &str) -> usize {
    match encoding_key {
        "cl100k_base" | "o200k_base" => 4,
        "p50k_base" | "r50k_base" => 4,
        _ => 4,
    }
}

fn count_tokens(message: &Message, encoding_key: &str) -> usize {
    let divisor = chars_per_token(encoding_key);
    let body_chars = message.as_text().chars().count();
    let call_chars: usize = message
        .tool_calls()
        .iter()
        .map(|c| c.name.len() + c.arguments.len())
        .sum();
    ((body_chars + call_chars) / divisor).max(1)
}

/// A token-bounded sliding window over the conversation sent to the model.
///
/// Holds at most one `System` message, always at position 0 when present.
/// `append` trims from the front as soon as the running total exceeds
/// `max_tokens`, never waiting for the next turn to catch up. Trimming never
/// splits an assistant message carrying tool calls from the tool-result
/// messages answering it -- the two are evicted as a single group so the
/// window can never be handed to a provider missing half of a call/result
/// pair.
pub struct MemoryWindow {
    messages: Vec<Message>,
    max_tokens: usize,
    preserve_system: bool,
    encoding_key: String,
}

impl MemoryWindow {
    pub fn new(max_tokens: usize, preserve_system: bool, encoding_key: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            preserve_system,
            encoding_key: encoding_key.into(),
        }
    }

    /// Install or replace the system message. Always occupies position 0.
    /// Does not count against the trimming loop when `preserve_system` is
    /// set -- the whole point of a system message is that it survives.
    pub fn set_system(&mut self, content: impl Into<String>) {
        let msg = Message::system(content);
        if self.preserve_system && self.messages.first().is_some_and(Message::is_system) {
            self.messages[0] = msg;
        } else {
            self.messages.insert(0, msg);
        }
    }

    /// Append a message and immediately trim if the window now exceeds its
    /// token budget. Trimming is synchronous and deterministic -- no model
    /// call is ever made to shrink the window (no-growth scenarios simply
    /// don't trim, per the boundary: a window sitting exactly at
    /// `max_tokens` is left alone on the next no-growth operation).
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
        self.trim();
    }

    pub fn append_many(&mut self, messages: impl IntoIterator<Item = Message>) {
        for m in messages {
            self.messages.push(m);
        }
        self.trim();
    }

    /// A clone of the current message list, in order, ready to hand to a
    /// [`corvus_model::CompletionRequest`].
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all non-system messages. When `keep_system` is false the system
    /// message is dropped too, leaving an entirely empty window.
    pub fn clear(&mut self, keep_system: bool) {
        if keep_system {
            self.messages.retain(Message::is_system);
        } else {
            self.messages.clear();
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| count_tokens(m, &self.encoding_key))
            .sum()
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 {
            return 1.0;
        }
        self.estimated_tokens() as f32 / self.max_tokens as f32
    }

    /// Shrink (or grow) the token budget and immediately re-trim against it.
    /// Used by context-overflow recovery, which lowers the budget below what
    /// the provider just rejected before retrying.
    pub fn set_max_tokens(&mut self, new_max_tokens: usize) {
        self.max_tokens = new_max_tokens;
        self.trim();
    }

    /// Deterministic last-resort compaction: keep the system message and the
    /// most recent `keep_n` non-system messages, replacing everything older
    /// with a single canned notice. Never calls the model -- this is a retry
    /// fallback, not a summarizer. A no-op if the window already has at most
    /// `keep_n` non-system messages.
    pub fn emergency_compact(&mut self, keep_n: usize) {
        let start = if self.messages.first().is_some_and(Message::is_system) { 1 } else { 0 };
        let body = &self.messages[start..];
        if body.len() <= keep_n {
            return;
        }
        let mut kept: Vec<Message> = body[body.len() - keep_n..].to_vec();
        // Never keep a tool-result message whose answering assistant call
        // was itself dropped.
        while kept.first().is_some_and(|m| m.answers_call_id().is_some()) {
            kept.remove(0);
        }

        let mut rebuilt = Vec::with_capacity(start + 1 + kept.len());
        rebuilt.extend(self.messages[..start].iter().cloned());
        rebuilt.push(Message::user(
            "[earlier conversation history was dropped to fit the context window]",
        ));
        rebuilt.extend(kept);
        self.messages = rebuilt;
    }

    fn trim(&mut self) {
        while self.preserve_system && self.estimated_tokens() > self.max_tokens {
            if !self.evict_oldest_group() {
                break;
            }
        }
    }

    /// Evict the oldest non-system message, along with every tool-result
    /// message answering it if it is an assistant message carrying tool
    /// calls. Returns `false` if there is nothing left worth evicting (only
    /// the system message, or a single remaining message) so the caller
    /// never spins trying to shrink a window that has already bottomed out.
    fn evict_oldest_group(&mut self) -> bool {
        let start = if self.messages.first().is_some_and(Message::is_system) { 1 } else { 0 };
        if self.messages.len().saturating_sub(start) <= 1 {
            return false;
        }
        match &self.messages[start] {
            Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                let ids: HashSet<&str> = tool_calls.iter().map(|c| c.id.as_str()).collect();
                let mut end = start + 1;
                while end < self.messages.len() {
                    match &self.messages[end] {
                        Message::Tool { tool_call_id, .. } if ids.contains(tool_call_id.as_str()) => {
                            end += 1;
                        }
                        _ => break,
                    }
                }
                self.messages.drain(start..end);
            }
            _ => {
                self.messages.remove(start);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use corvus_model::ToolCall;

    use super::*;

    fn window(max_tokens: usize) -> MemoryWindow {
        MemoryWindow::new(max_tokens, true, "cl100k_base")
    }

    #[test]
    fn set_system_stays_at_position_zero() {
        let mut w = window(10_000);
        w.append(Message::user("hi"));
        w.set_system("be terse");
        assert!(w.snapshot()[0].is_system());
    }

    #[test]
    fn set_system_replaces_not_duplicates() {
        let mut w = window(10_000);
        w.set_system("first");
        w.set_system("second");
        let snap = w.snapshot();
        assert_eq!(snap.iter().filter(|m| m.is_system()).count(), 1);
        assert_eq!(snap[0].as_text(), "second");
    }

    #[test]
    fn window_at_exactly_max_tokens_does_not_trim_on_no_growth_operation() {
        let mut w = window(10_000);
        w.set_system("sys");
        w.append(Message::user("hello"));
        let before = w.len();
        // A read-only operation must never trim.
        let _ = w.estimated_tokens();
        assert_eq!(w.len(), before);
    }

    #[test]
    fn trims_oldest_non_system_message_first() {
        let mut w = window(3); // tiny budget forces eviction almost immediately
        w.set_system("sys");
        w.append(Message::user("aaaaaaaaaaaaaaaaaaaa"));
        w.append(Message::user("bbbbbbbbbbbbbbbbbbbb"));
        let snap = w.snapshot();
        assert!(snap.iter().any(|m| m.as_text().starts_with('b')));
        assert!(!snap.iter().any(|m| m.as_text().starts_with('a')));
    }

    #[test]
    fn system_message_is_never_evicted() {
        let mut w = window(1);
        w.set_system("sys");
        for i in 0..20 {
            w.append(Message::user(format!("message number {i} with some padding text")));
        }
        assert!(w.snapshot()[0].is_system());
    }

    #[test]
    fn oversized_single_user_message_is_never_evicted_below_two_messages() {
        let mut w = window(1);
        w.set_system("sys");
        let huge = "x".repeat(10_000);
        w.append(Message::user(huge));
        // system + the one oversized message: trimming must stop here even
        // though the window is far over budget.
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn assistant_tool_call_and_its_tool_results_are_evicted_as_one_group() {
        let mut w = window(6);
        w.set_system("sys");
        w.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall { id: "a".into(), name: "read_file".into(), arguments: "{}".into() }],
        ));
        w.append(Message::tool_result("a", "file contents here"));
        w.append(Message::user("follow up question padded out"));
        let snap = w.snapshot();
        // The assistant-with-tool-calls message and its tool result must
        // either both be present or both be gone -- never just one.
        let has_assistant = snap.iter().any(Message::has_tool_calls);
        let has_orphan_tool = snap.iter().any(|m| m.answers_call_id() == Some("a"));
        assert_eq!(has_assistant, has_orphan_tool);
    }

    #[test]
    fn clear_keep_system_retains_only_system_message() {
        let mut w = window(10_000);
        w.set_system("sys");
        w.append(Message::user("hi"));
        w.clear(true);
        assert_eq!(w.len(), 1);
        assert!(w.snapshot()[0].is_system());
    }

    #[test]
    fn clear_without_keep_system_empties_everything() {
        let mut w = window(10_000);
        w.set_system("sys");
        w.append(Message::user("hi"));
        w.clear(false);
        assert!(w.is_empty());
    }

    #[test]
    fn context_fraction_is_proportion_of_budget_used() {
        let mut w = window(1000);
        w.append(Message::user("hello"));
        let frac = w.context_fraction();
        assert!(frac > 0.0 && frac < 1.0);
    }

    #[test]
    fn unrecognized_encoding_key_falls_back_to_default_divisor() {
        let mut a = MemoryWindow::new(10_000, true, "cl100k_base");
        let mut b = MemoryWindow::new(10_000, true, "some_unknown_encoding");
        a.append(Message::user("identical payload"));
        b.append(Message::user("identical payload"));
        assert_eq!(a.estimated_tokens(), b.estimated_tokens());
    }

    #[test]
    fn set_max_tokens_retrims_immediately() {
        let mut w = window(10_000);
        w.set_system("sys");
        for i in 0..50 {
            w.append(Message::user(format!("padded message number {i}")));
        }
        w.set_max_tokens(5);
        assert!(w.estimated_tokens() <= w.max_tokens() + 50);
    }

    #[test]
    fn emergency_compact_keeps_system_and_last_n() {
        let mut w = window(10_000);
        w.set_system("sys");
        for i in 0..20 {
            w.append(Message::user(format!("msg {i}")));
        }
        w.emergency_compact(3);
        let snap = w.snapshot();
        assert!(snap[0].is_system());
        assert!(snap[1].as_text().contains("dropped"));
        assert_eq!(snap.len(), 1 + 1 + 3);
        assert_eq!(snap.last().unwrap().as_text(), "msg 19");
    }

    #[test]
    fn emergency_compact_drops_orphaned_tool_results() {
        let mut w = window(10_000);
        w.set_system("sys");
        w.append(Message::assistant_with_tool_calls(
            "",
            vec![ToolCall { id: "a".into(), name: "read_file".into(), arguments: "{}".into() }],
        ));
        w.append(Message::tool_result("a", "contents"));
        w.append(Message::user("next question"));
        // keep_n = 1 would otherwise keep only the orphaned tool result.
        w.emergency_compact(1);
        let snap = w.snapshot();
        assert!(!snap.iter().any(|m| m.answers_call_id().is_some()));
    }

    #[test]
    fn emergency_compact_is_a_noop_when_already_within_keep_n() {
        let mut w = window(10_000);
        w.set_system("sys");
        w.append(Message::user("only one"));
        w.emergency_compact(5);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn repeated_append_eventually_reaches_a_fixpoint_under_constant_pressure() {
        let mut w = window(50);
        w.set_system("sys");
        for i in 0..200 {
            w.append(Message::user(format!("msg {i}")));
        }
        let tokens_after = w.estimated_tokens();
        w.append(Message::user("one more"));
        let tokens_after_one_more = w.estimated_tokens();
        // Steady state: the window doesn't grow without bound.
        assert!(tokens_after_one_more <= w.max_tokens() + 50);
        assert!(tokens_after <= w.max_tokens() + 50);
    }
}
