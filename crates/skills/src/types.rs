use serde::{Deserialize, Serialize};

/// A skill definition loaded from `skill.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillTemplate {
    pub name: String,
    pub description: String,
    /// Case-insensitive phrases that route a prompt to this skill.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Higher priority wins when several skills match.
    #[serde(default)]
    pub priority: i32,
    /// Tool names this skill expects to be available.
    #[serde(default)]
    pub tools: Vec<String>,
    /// The prompt fragment injected into the system context.
    pub body: String,
}

impl SkillTemplate {
    /// Whether any trigger phrase occurs in the prompt (case-insensitive).
    pub fn matches(&self, prompt: &str) -> bool {
        let lower = prompt.to_lowercase();
        self.triggers
            .iter()
            .any(|t| !t.is_empty() && lower.contains(&t.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(triggers: &[&str]) -> SkillTemplate {
        SkillTemplate {
            name: "calendar".into(),
            description: "calendar lookups".into(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            priority: 0,
            tools: vec![],
            body: "Use the calendar tool.".into(),
        }
    }

    #[test]
    fn trigger_match_is_case_insensitive() {
        let s = skill(&["my schedule"]);
        assert!(s.matches("What's on MY SCHEDULE tomorrow?"));
        assert!(!s.matches("what's the weather"));
    }

    #[test]
    fn empty_triggers_never_match() {
        let s = skill(&[]);
        assert!(!s.matches("anything at all"));
        let s = skill(&[""]);
        assert!(!s.matches("anything at all"));
    }
}
