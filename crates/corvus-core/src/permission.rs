// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::Value;

/// Bridge to whatever is rendering this run to a human: a terminal UI, a
/// notification, a bot reply. The executor calls this exactly once per tool
/// invocation whose effective policy is `Ask`; it never renders anything
/// itself. Treat this as an interface to the renderer, never inline the UI
/// here.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    /// Returns `true` to approve the call, `false` to deny it.
    async fn ask(&self, tool_name: &str, args: &Value) -> bool;
}

/// Approves every `Ask` request without prompting. Useful for
/// non-interactive runs and tests where the policy is already known to be
/// acceptable.
pub struct AutoApprove;

#[async_trait]
impl PermissionCallback for AutoApprove {
    async fn ask(&self, _tool_name: &str, _args: &Value) -> bool {
        true
    }
}

/// Denies every `Ask` request. Useful for fully unattended/sandboxed runs
/// where a prompt the user cannot answer should fail closed.
pub struct AutoDeny;

#[async_trait]
impl PermissionCallback for AutoDeny {
    async fn ask(&self, _tool_name: &str, _args: &Value) -> bool {
        false
    }
}
