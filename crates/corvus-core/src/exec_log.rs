// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

const MAX_LISTED_PATHS: usize = 20;
const MAX_SUGGESTED_ACTIONS: usize = 4;

/// How a delegated run ended, independent of any per-tool outcome. Used as
/// the other half of the pure function that picks a [`FailureCategory`].
#[derive(Debug, Clone)]
pub enum TerminationCause {
    Timeout,
    RuntimeError(String),
    InvalidTask(String),
}

/// Coarse bucket explaining why a delegated sub-agent run did not cleanly
/// complete, so the parent doesn't have to re-derive this from raw tool
/// output. Chosen by a pure function of the Execution Log plus the
/// termination cause -- never by asking the child to self-report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Timeout,
    ToolError,
    MissingContext,
    InvalidTask,
    PartialSuccess,
}

impl FailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Timeout => "TIMEOUT",
            FailureCategory::ToolError => "TOOL_ERROR",
            FailureCategory::MissingContext => "MISSING_CONTEXT",
            FailureCategory::InvalidTask => "INVALID_TASK",
            FailureCategory::PartialSuccess => "PARTIAL_SUCCESS",
        }
    }

    /// Up to 4 bullet lines of generic, actionable retry guidance. These are
    /// deliberately tool-agnostic -- the report's `tools` and `files.*`
    /// sections already carry the specifics.
    pub fn suggested_actions(self) -> &'static [&'static str] {
        match self {
            FailureCategory::Timeout => &[
                "retry with a longer delegation timeout",
                "break the task into smaller sub-tasks",
            ],
            FailureCategory::ToolError => &[
                "inspect the failing tool's output in this report",
                "retry with a more specific instruction",
            ],
            FailureCategory::MissingContext => &[
                "provide the missing file paths or identifiers directly",
                "have the parent gather context before delegating",
            ],
            FailureCategory::InvalidTask => &[
                "rephrase the task as a single concrete, actionable request",
            ],
            FailureCategory::PartialSuccess => &[
                "review what was completed before retrying the remainder",
                "delegate only the unfinished portion next time",
            ],
        }
    }
}

/// Chooses a [`FailureCategory`] from the termination cause and the tail of
/// the execution log. Pure: same inputs, same category, every time.
pub fn categorize(log: &ExecutionLog, cause: &TerminationCause) -> FailureCategory {
    match cause {
        TerminationCause::Timeout => FailureCategory::Timeout,
        TerminationCause::InvalidTask(_) => FailureCategory::InvalidTask,
        TerminationCause::RuntimeError(_) => {
            if log.total() == 0 {
                FailureCategory::MissingContext
            } else if log.failed() > 0 && log.succeeded() > 0 {
                FailureCategory::PartialSuccess
            } else if log.failed() > 0 {
                FailureCategory::ToolError
            } else {
                FailureCategory::MissingContext
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Timeout,
    Partial,
}

impl ExecutionStatus {
    fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    Read,
    Written,
    Edited,
}

/// A single recorded tool invocation.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub name: String,
    pub duration: Duration,
    pub ok: bool,
    /// Files this invocation touched and how, derived from its arguments.
    /// Best-effort: only populated for builtin tools with a recognizable
    /// `path` argument; an unrecognized tool simply contributes no entries
    /// here while still counting toward `tools`.
    pub files: Vec<(FileAccess, String)>,
}

/// Append-only record of every tool invocation an agent made during a run,
/// plus enough bookkeeping to render the structured report a `sub_agent`
/// call returns to its parent.
pub struct ExecutionLog {
    pub session_id: String,
    pub parent_session_id: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    entries: Vec<ToolExecution>,
}

impl ExecutionLog {
    pub fn new(session_id: impl Into<String>, parent_session_id: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            parent_session_id,
            started_at,
            finished_at: None,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, execution: ToolExecution) {
        self.entries.push(execution);
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| !e.ok).count()
    }

    pub fn success_rate(&self) -> Option<u32> {
        if self.entries.is_empty() {
            return None;
        }
        Some(((self.succeeded() as f64 / self.entries.len() as f64) * 100.0).round() as u32)
    }

    fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.finished_at.unwrap_or(now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    fn files(&self, access: FileAccess) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        for e in &self.entries {
            for (a, path) in &e.files {
                if *a == access {
                    seen.insert(path.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    fn tool_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for e in &self.entries {
            *counts.entry(e.name.clone()).or_insert(0) += 1;
        }
        let mut v: Vec<(String, usize)> = counts.into_iter().collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        v
    }

    /// Render the deterministic structured report a `sub_agent` call returns
    /// to its parent: session/status/duration/success-rate/files/tools,
    /// followed -- on anything but a clean completion -- by a failure
    /// category, a blocked-on note, and up to 4 suggested actions, and
    /// finally the child's own final text.
    pub fn report(
        &self,
        now: DateTime<Utc>,
        status: ExecutionStatus,
        final_text: &str,
        failure: Option<(FailureCategory, &str)>,
    ) -> String {
        let mut out = String::new();
        out.push_str(&format!("session_id: {}\n", self.session_id));
        out.push_str(&format!(
            "parent_id: {}\n",
            self.parent_session_id.as_deref().unwrap_or("none")
        ));
        out.push_str(&format!("status: {}\n", status.as_str()));
        out.push_str(&format!("duration: {:.2}s\n", self.duration(now).as_secs_f64()));
        out.push_str(&format!(
            "success_rate: {}\n",
            self.success_rate().map(|r| format!("{r}%")).unwrap_or_else(|| "N/A".into())
        ));

        for (label, access) in [
            ("read", FileAccess::Read),
            ("written", FileAccess::Written),
            ("edited", FileAccess::Edited),
        ] {
            let mut paths = self.files(access);
            let truncated = paths.len() > MAX_LISTED_PATHS;
            paths.truncate(MAX_LISTED_PATHS);
            let mut csv = paths.join(", ");
            if truncated {
                csv.push_str(", …");
            }
            out.push_str(&format!("files.{label}.count: {}\n", self.files(access).len()));
            out.push_str(&format!("files.{label}.paths: {csv}\n"));
        }

        let counts = self.tool_counts();
        if counts.is_empty() {
            out.push_str("tools: none\n");
        } else {
            let rendered = counts
                .iter()
                .map(|(name, n)| format!("{name}: {n}x"))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("tools: {rendered}\n"));
        }

        if let Some((category, blocked_on)) = failure {
            out.push_str(&format!("category: {}\n", category.as_str()));
            out.push_str(&format!("blocked_on: {blocked_on}\n"));
            out.push_str("suggested_actions:\n");
            for action in category.suggested_actions().iter().take(MAX_SUGGESTED_ACTIONS) {
                out.push_str(&format!("- {action}\n"));
            }
        }

        out.push_str("---\n");
        out.push_str(final_text);
        out
    }
}
