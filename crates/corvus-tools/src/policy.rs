// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use corvus_config::{OperationMode, ToolsConfig};

/// Per-tool approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Always run without asking
    Auto,
    /// Ask user before each invocation
    Ask,
    /// Never run; return an error
    Deny,
}

/// Policy engine that maps a tool call to an approval decision.
#[derive(Debug)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            auto_patterns: compile(&cfg.auto_approve_patterns),
            deny_patterns: compile(&cfg.deny_patterns),
        }
    }

    /// Like [`Self::decide`], but distinguishes "no pattern matched" (`None`)
    /// from an explicit `Ask` decision -- a caller composing this with a
    /// tool's own declared default policy needs to know whether these glob
    /// patterns actually said anything about this command, rather than
    /// silently overriding every unlisted tool with the default-to-`Ask`
    /// fallback.
    pub fn matched(&self, command: &str) -> Option<ApprovalPolicy> {
        for re in &self.deny_patterns {
            if re.is_match(command) {
                return Some(ApprovalPolicy::Deny);
            }
        }
        for re in &self.auto_patterns {
            if re.is_match(command) {
                return Some(ApprovalPolicy::Auto);
            }
        }
        None
    }

    /// Decide whether a tool call (identified by its command string) should
    /// run automatically, prompt the user, or be denied, ignoring Operation
    /// Mode. Use [`Self::decide_with_mode`] when a mode promotion applies.
    pub fn decide(&self, command: &str) -> ApprovalPolicy {
        self.matched(command).unwrap_or(ApprovalPolicy::Ask)
    }

    /// As [`Self::decide`], then apply the Operation Mode's promotion rule:
    /// in `safe` mode an `Auto` decision is downgraded to `Ask` so that every
    /// side-effecting call in that mode gets a confirmation, regardless of
    /// the configured auto-approve patterns. `Deny` always stays `Deny`.
    pub fn decide_with_mode(&self, command: &str, mode: OperationMode) -> ApprovalPolicy {
        match (self.decide(command), mode) {
            (ApprovalPolicy::Auto, OperationMode::Safe) => ApprovalPolicy::Ask,
            (decision, _) => decision,
        }
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with(auto: &[&str], deny: &[&str]) -> ToolPolicy {
        ToolPolicy::from_config(&ToolsConfig {
            auto_approve_patterns: auto.iter().map(|s| s.to_string()).collect(),
            deny_patterns: deny.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn deny_beats_auto_for_same_pattern() {
        let p = policy_with(&["rm *"], &["rm *"]);
        assert_eq!(p.decide("rm /tmp/foo"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_exact_match() {
        let p = policy_with(&[], &["rm -rf /*"]);
        assert_eq!(p.decide("rm -rf /*"), ApprovalPolicy::Deny);
    }

    #[test]
    fn deny_does_not_match_different_prefix() {
        let p = policy_with(&[], &["rm -rf /*"]);
        assert_ne!(p.decide("git status"), ApprovalPolicy::Deny);
    }

    #[test]
    fn auto_approve_wildcard_prefix() {
        let p = policy_with(&["cat *"], &[]);
        assert_eq!(p.decide("cat /etc/hosts"), ApprovalPolicy::Auto);
    }

    #[test]
    fn auto_approve_exact_command() {
        let p = policy_with(&["ls"], &[]);
        assert_eq!(p.decide("ls"), ApprovalPolicy::Auto);
    }

    #[test]
    fn auto_approve_question_mark_matches_one_char() {
        let p = policy_with(&["ls ?"], &[]);
        assert_eq!(p.decide("ls -"), ApprovalPolicy::Auto);
        assert_ne!(p.decide("ls --"), ApprovalPolicy::Auto);
    }

    #[test]
    fn unknown_command_results_in_ask() {
        let p = policy_with(&["cat *"], &["rm -rf /*"]);
        assert_eq!(p.decide("git commit -m test"), ApprovalPolicy::Ask);
    }

    #[test]
    fn empty_patterns_always_ask() {
        let p = policy_with(&[], &[]);
        assert_eq!(p.decide("anything"), ApprovalPolicy::Ask);
    }

    #[test]
    fn default_config_asks_when_no_patterns_configured() {
        let p = ToolPolicy::from_config(&ToolsConfig::default());
        assert_eq!(p.decide("cat README.md"), ApprovalPolicy::Ask);
    }

    #[test]
    fn safe_mode_downgrades_auto_to_ask() {
        let p = policy_with(&["cat *"], &[]);
        assert_eq!(
            p.decide_with_mode("cat README.md", OperationMode::Safe),
            ApprovalPolicy::Ask
        );
    }

    #[test]
    fn standard_mode_keeps_auto() {
        let p = policy_with(&["cat *"], &[]);
        assert_eq!(
            p.decide_with_mode("cat README.md", OperationMode::Standard),
            ApprovalPolicy::Auto
        );
    }

    #[test]
    fn matched_returns_none_when_nothing_matches() {
        let p = policy_with(&["cat *"], &["rm -rf /*"]);
        assert_eq!(p.matched("git commit -m test"), None);
    }

    #[test]
    fn matched_returns_the_explicit_decision() {
        let p = policy_with(&["cat *"], &[]);
        assert_eq!(p.matched("cat README.md"), Some(ApprovalPolicy::Auto));
    }

    #[test]
    fn safe_mode_does_not_soften_deny() {
        let p = policy_with(&[], &["rm -rf /*"]);
        assert_eq!(
            p.decide_with_mode("rm -rf /*", OperationMode::Safe),
            ApprovalPolicy::Deny
        );
    }
}
