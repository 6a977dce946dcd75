//! Tool approval policy.
//!
//! `is_autonomous` is read live on every tool call so a UI toggle takes
//! effect mid-conversation. The allowlist holds canonical shell commands
//! approved with "always"; denied patterns are compiled once and block a
//! command regardless of autonomy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use nebo_domain::config::PolicyConfig;

pub struct Policy {
    autonomous: AtomicBool,
    allowlist: RwLock<HashSet<String>>,
    denied: regex::RegexSet,
}

impl Policy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        let denied = regex::RegexSet::new(&config.denied_patterns).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bad denied_patterns; denying nothing");
            regex::RegexSet::empty()
        });
        Self {
            autonomous: AtomicBool::new(config.autonomous),
            allowlist: RwLock::new(config.allowlist.iter().cloned().collect()),
            denied,
        }
    }

    /// Live autonomy check, not a snapshot.
    pub fn is_autonomous(&self) -> bool {
        self.autonomous.load(Ordering::Acquire)
    }

    pub fn set_autonomous(&self, on: bool) {
        self.autonomous.store(on, Ordering::Release);
    }

    /// Whether a tool call may run without prompting.
    pub fn is_preapproved(&self, tool_name: &str, input: &Value) -> bool {
        if self.is_autonomous() {
            return true;
        }
        match canonical_command(tool_name, input) {
            Some(cmd) => self.allowlist.read().contains(&cmd),
            None => false,
        }
    }

    /// Whether a command is on the never-run list.
    pub fn is_denied(&self, tool_name: &str, input: &Value) -> bool {
        match canonical_command(tool_name, input) {
            Some(cmd) => self.denied.is_match(&cmd),
            None => false,
        }
    }

    /// Record an "always" approval: the canonical command joins the
    /// allowlist so identical calls skip prompting.
    pub fn allow_always(&self, tool_name: &str, input: &Value) {
        if let Some(cmd) = canonical_command(tool_name, input) {
            tracing::info!(command = %cmd, "command added to allowlist");
            self.allowlist.write().insert(cmd);
        }
    }

    pub fn allowlist_snapshot(&self) -> Vec<String> {
        let mut list: Vec<String> = self.allowlist.read().iter().cloned().collect();
        list.sort();
        list
    }
}

/// Normalize a shell-style tool input to a canonical command string:
/// the `command` field, trimmed, with internal whitespace collapsed.
/// Non-shell tools have no canonical form.
pub fn canonical_command(tool_name: &str, input: &Value) -> Option<String> {
    if !is_shell_style(tool_name) {
        return None;
    }
    let raw = input.get("command")?.as_str()?;
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn is_shell_style(tool_name: &str) -> bool {
    matches!(tool_name, "shell" | "bash" | "exec")
}
