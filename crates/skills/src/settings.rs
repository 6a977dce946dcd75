//! `skill-settings.json` — the disabled-skills set shared with the UI.

use std::path::Path;

use serde::{Deserialize, Serialize};

use nebo_domain::error::{Error, Result};

/// On-disk shape: `{"disabledSkills": ["name", ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSettings {
    #[serde(rename = "disabledSkills", default)]
    pub disabled_skills: Vec<String>,
}

impl SkillSettings {
    /// Load from `<data_dir>/skill-settings.json`; a missing file is an
    /// empty settings object.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join("skill-settings.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "malformed skill-settings.json; using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join("skill-settings.json");
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw).map_err(Error::Io)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_skills.iter().any(|s| s == name)
    }
}
