// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use corvus_config::{AgentConfig, OperationMode, RuntimeMode};
use corvus_model::ToolCall as ModelToolCall;
use corvus_tools::{ApprovalPolicy, OutputCategory, Tool, ToolCall as RegistryToolCall, ToolOutput, ToolPolicy, ToolRegistry};
use tokio::sync::Mutex as AsyncMutex;

use crate::cancel::CancelToken;

/// A tool invocation's result plus the bookkeeping the caller needs to
/// append an [`crate::exec_log::ToolExecution`] and a `Tool` message,
/// without the executor having to know about either.
pub struct DispatchResult {
    pub output: ToolOutput,
    pub tool_name: String,
    pub duration: Duration,
}

/// Drives every tool call in a turn through resolve -> parse -> validate ->
/// permission-gate -> execute-with-timeout, honouring per-tool mutual
/// exclusion and cooperative cancellation. Every failure mode becomes a
/// [`ToolOutput::err`], never a propagated `Err` -- this is the boundary
/// where "tool failure is data" actually happens.
///
/// Cheap to clone: every field is an `Arc` (or `Copy`), so each spawned
/// dispatch task gets its own handle onto the same registry, policy and
/// mutex-key map.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    permission: Arc<dyn crate::permission::PermissionCallback>,
    policy: Arc<ToolPolicy>,
    runtime_mode: RuntimeMode,
    operation_mode: OperationMode,
    tool_timeout: Duration,
    result_token_cap: usize,
    cancel_grace: Duration,
    mutex_keys: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        permission: Arc<dyn crate::permission::PermissionCallback>,
        policy: ToolPolicy,
        runtime_mode: RuntimeMode,
        config: &AgentConfig,
    ) -> Self {
        Self {
            registry,
            permission,
            policy: Arc::new(policy),
            runtime_mode,
            operation_mode: config.operation_mode,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
            result_token_cap: config.tool_result_token_cap,
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
            mutex_keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run every call in `calls` concurrently (structured concurrency: all
    /// are spawned before any is awaited) and return results in the
    /// original call order, regardless of completion order.
    pub async fn execute_batch(&self, calls: &[ModelToolCall], cancel: &CancelToken) -> Vec<DispatchResult> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let this = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { this.dispatch_with_cancellation(call, cancel).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(_join_err) => results.push(DispatchResult {
                    output: ToolOutput::err("unknown", "Error: tool task panicked"),
                    tool_name: "unknown".into(),
                    duration: Duration::ZERO,
                }),
            }
        }
        results
    }

    /// Race one dispatch against cancellation. On cancellation the dispatch
    /// is given `cancel_grace` to finish on its own before being aborted and
    /// replaced with a cancellation error -- a clean shutdown beats an
    /// instant but wasted one.
    async fn dispatch_with_cancellation(self, call: ModelToolCall, cancel: CancelToken) -> DispatchResult {
        let started = Instant::now();
        let tool_name = call.name.clone();
        let grace = self.cancel_grace;

        let this = self.clone();
        let mut handle = tokio::spawn(async move { this.dispatch(call).await });

        tokio::select! {
            biased;
            res = &mut handle => {
                let output = res.unwrap_or_else(|_| ToolOutput::err("unknown", "Error: tool task panicked"));
                return DispatchResult { output, tool_name, duration: started.elapsed() };
            }
            _ = cancel.cancelled() => {}
        }

        let output = match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(out)) => out,
            Ok(Err(_)) => ToolOutput::err("unknown", "Error: tool task panicked"),
            Err(_) => {
                handle.abort();
                ToolOutput::err("unknown", "Error: cancelled")
            }
        };
        DispatchResult { output, tool_name, duration: started.elapsed() }
    }

    async fn dispatch(&self, call: ModelToolCall) -> ToolOutput {
        // Step 1: resolve.
        let tool = match self.registry.resolve(&call.name) {
            Some(t) => t,
            None => return ToolOutput::err(&call.id, format!("Error: Unknown tool '{}'", call.name)),
        };

        // Hierarchy enforcement: a tool's `allowed_modes` is not just a
        // presentation filter. Even if a model somehow names a tool it was
        // never offered (e.g. a child hallucinating `sub_agent`), it must
        // not run.
        if !tool.allowed_modes().contains(&self.runtime_mode) {
            return ToolOutput::err(&call.id, format!("Error: Unknown tool '{}'", call.name));
        }

        // Plan-mode capability enforcement: `schemas()` already hides mutating
        // tools from the model, but a hallucinated call must not slip through
        // dispatch either -- the same "indistinguishable from unknown" answer
        // as the hierarchy check above.
        if self.operation_mode == OperationMode::Plan && tool.capability().is_mutating() {
            return ToolOutput::err(&call.id, format!("Error: Unknown tool '{}'", call.name));
        }

        // Step 2: parse, with JSON repair on malformed provider output.
        let args = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str::<serde_json::Value>(&call.arguments) {
                Ok(v) => v,
                Err(_) => match attempt_json_repair(&call.arguments) {
                    Ok(v) => v,
                    Err(_) => {
                        return ToolOutput::err(
                            &call.id,
                            format!("Error: malformed arguments for tool '{}': could not be parsed or repaired", call.name),
                        )
                    }
                },
            }
        };

        // Step 3: validate against the declared schema.
        if let Err(reason) = validate_args(&tool.parameters_schema(), &args) {
            return ToolOutput::err(&call.id, format!("Error: invalid arguments for tool '{}': {reason}", call.name));
        }

        // Step 4: permission gate.
        match self.effective_policy(tool.as_ref()) {
            ApprovalPolicy::Deny => {
                return ToolOutput::err(&call.id, "Error: tool call blocked by policy");
            }
            ApprovalPolicy::Ask => {
                if !self.permission.ask(&call.name, &args).await {
                    return ToolOutput::err(&call.id, "Error: tool call denied by user");
                }
            }
            ApprovalPolicy::Auto => {}
        }

        let registry_call = RegistryToolCall { id: call.id.clone(), name: call.name.clone(), args };

        // Step 5: execute with timeout and mutual exclusion.
        let _guard = match tool.mutex_key() {
            Some(key) => Some(self.acquire(key).await),
            None => None,
        };

        let result = tokio::time::timeout(self.tool_timeout, tool.execute(&registry_call)).await;
        let output = match result {
            Ok(out) => out,
            Err(_) => ToolOutput::err(&call.id, format!("Error: tool timed out after {}s", self.tool_timeout.as_secs())),
        };

        // Step 6: truncate oversized output by the tool's declared shape.
        if output.is_error {
            output
        } else {
            ToolOutput::ok(
                output.call_id,
                smart_truncate(&output.content, tool.output_category(), self.result_token_cap),
            )
        }
    }

    fn effective_policy(&self, tool: &dyn Tool) -> ApprovalPolicy {
        let mut policy = match self.policy.matched(tool.name()) {
            Some(explicit) => explicit,
            None => tool.default_policy(),
        };
        if self.operation_mode == OperationMode::Safe && tool.capability().is_mutating() && policy == ApprovalPolicy::Auto {
            policy = ApprovalPolicy::Ask;
        }
        policy
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let mut keys = self.mutex_keys.lock().expect("mutex-key map poisoned");
            keys.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }
}

// ─── JSON argument repair ──────────────────────────────────────────────────
//
// Models occasionally emit tool-call argument JSON with invalid escape
// sequences, a missing comma between fields, or an abruptly-truncated tail.
// These three passes are tried in order; the first one that parses wins.

fn attempt_json_repair(json_str: &str) -> anyhow::Result<serde_json::Value> {
    let fixed = fix_invalid_json_escapes(json_str);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&fixed) {
        return Ok(v);
    }

    let repaired = regex::Regex::new(r#""([^"]+)"([a-zA-Z_][a-zA-Z0-9_]*)":\s*"#)
        .unwrap()
        .replace_all(&fixed, r#""$1", "$2": "#);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
        return Ok(v);
    }

    if !fixed.trim().ends_with('}') {
        let mut completed = fixed.clone();
        let quote_count = fixed.chars().filter(|&c| c == '"').count();
        if quote_count % 2 == 1 {
            completed.push('"');
        }
        if !completed.trim().ends_with('}') {
            completed.push('}');
        }
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&completed) {
            return Ok(v);
        }
    }

    anyhow::bail!("JSON repair failed: all repair strategies exhausted")
}

/// Replace invalid JSON string escapes (e.g. `\c`, `\(`) with a properly
/// escaped backslash so the result round-trips through `serde_json`.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Schema validation ─────────────────────────────────────────────────────

/// A minimal JSON-Schema (object, `required`, and `properties[].type`)
/// checker -- enough to name the first missing or mistyped field without
/// pulling in a full schema-validation crate neither this corpus nor the
/// original tool set uses.
fn validate_args(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    if !args.is_object() {
        return Err("arguments must be a JSON object".into());
    }
    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if args.get(name).is_none() {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }
    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (name, prop_schema) in properties {
            let Some(value) = args.get(name) else { continue };
            let Some(expected) = prop_schema.get("type").and_then(|v| v.as_str()) else { continue };
            if !matches_json_type(value, expected) {
                return Err(format!("field '{name}' must be of type '{expected}'"));
            }
        }
    }
    Ok(())
}

fn matches_json_type(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

// ─── Smart truncation ──────────────────────────────────────────────────────

/// Deterministic, content-aware tool-result truncation. Returns `content`
/// unchanged when it already fits `cap_tokens`; otherwise applies the
/// extraction strategy matching the tool's declared [`OutputCategory`] --
/// never a hard-coded tool name -- and appends an explicit notice so the
/// model knows more content exists.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!("[... {{lines}} more matches omitted ({omitted_bytes} bytes); use a more specific pattern to see them ...]"),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!("[... {{lines}} lines omitted ({omitted_bytes} bytes); use read_file with offset/limit to see more ...]"),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            format!("{}\n[... {omitted_bytes} bytes omitted; content truncated to fit context budget ...]", &content[..cut])
        }
    }
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}
