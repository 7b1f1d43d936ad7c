// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use corvus_config::{RuntimeMode, ToolCapability};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str { "edit_file" }

    fn description(&self) -> &str {
        "Replaces an exact occurrence of old_str with new_str in an existing file.\n\
         old_str must match the file content exactly, including whitespace — strip any\n\
         L{n}: line-number prefix from read_file output before passing it here.\n\
         old_str must be unique in the file unless replace_all is set; fails if it occurs\n\
         zero or more than once. ALWAYS prefer this over write for existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to find and replace"
                },
                "new_str": {
                    "type": "string",
                    "description": "Text to replace it with"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring exactly one (default false)"
                }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }
    fn allowed_modes(&self) -> &[RuntimeMode] { &[RuntimeMode::Parent, RuntimeMode::Child] }
    fn capability(&self) -> ToolCapability { ToolCapability::Write }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let old_str = match call.args.get("old_str").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'old_str'"),
        };
        let new_str = match call.args.get("new_str").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'new_str'"),
        };
        let replace_all = call.args.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        if old_str == new_str {
            return ToolOutput::err(&call.id, "old_str and new_str are identical");
        }

        debug!(path = %path, replace_all, "edit_file tool");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let occurrences = content.matches(old_str.as_str()).count();
        if occurrences == 0 {
            return ToolOutput::err(&call.id, "old_str not found in file");
        }
        if occurrences > 1 && !replace_all {
            return ToolOutput::err(
                &call.id,
                format!(
                    "old_str matches {occurrences} locations; make it unique or set replace_all=true"
                ),
            );
        }

        let updated = if replace_all {
            content.replace(old_str.as_str(), &new_str)
        } else {
            content.replacen(old_str.as_str(), &new_str, 1)
        };

        match tokio::fs::write(&path, &updated).await {
            Ok(_) => ToolOutput::ok(
                &call.id,
                format!("replaced {occurrences} occurrence(s) in {path}"),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}
