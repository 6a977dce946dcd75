use serde::{Deserialize, Serialize};

/// Tool approval policy settings. The live autonomous flag and allowlist
/// mutate at runtime; these are the persisted seeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// When true, tool calls never prompt for approval.
    #[serde(default)]
    pub autonomous: bool,
    /// Canonical shell commands pre-approved for unattended execution.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Regex patterns for commands that are never executed, autonomous or not.
    #[serde(default)]
    pub denied_patterns: Vec<String>,
}
