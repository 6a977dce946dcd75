//! In-memory skill registry with trigger routing.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use nebo_domain::error::Result;

use crate::settings::SkillSettings;
use crate::types::SkillTemplate;

/// Holds loaded skills plus the disabled set.
pub struct SkillRegistry {
    skills: RwLock<Vec<SkillTemplate>>,
    settings: RwLock<SkillSettings>,
    skills_root: PathBuf,
    data_dir: PathBuf,
}

impl SkillRegistry {
    /// Scan `skills_root` for `*/skill.toml` manifests and load the
    /// disabled set from the data dir.
    pub fn load(skills_root: &Path, data_dir: &Path) -> Result<Self> {
        let skills = scan_skills(skills_root);
        let settings = SkillSettings::load(data_dir);
        tracing::info!(
            skills = skills.len(),
            disabled = settings.disabled_skills.len(),
            "skill registry loaded"
        );
        Ok(Self {
            skills: RwLock::new(skills),
            settings: RwLock::new(settings),
            skills_root: skills_root.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn empty() -> Self {
        Self {
            skills: RwLock::new(Vec::new()),
            settings: RwLock::new(SkillSettings::default()),
            skills_root: PathBuf::new(),
            data_dir: PathBuf::new(),
        }
    }

    pub fn with_skills(skills: Vec<SkillTemplate>) -> Self {
        let reg = Self::empty();
        *reg.skills.write() = skills;
        reg
    }

    /// Skills whose triggers match the prompt, highest priority first.
    /// Disabled skills never match.
    pub fn matching(&self, prompt: &str) -> Vec<SkillTemplate> {
        let settings = self.settings.read();
        let mut hits: Vec<SkillTemplate> = self
            .skills
            .read()
            .iter()
            .filter(|s| !settings.is_disabled(&s.name) && s.matches(prompt))
            .cloned()
            .collect();
        hits.sort_by_key(|s| std::cmp::Reverse(s.priority));
        hits
    }

    /// Look up a skill by name for force-routing. Disabled skills are
    /// still returned: an explicit route overrides the toggle.
    pub fn by_name(&self, name: &str) -> Option<SkillTemplate> {
        self.skills.read().iter().find(|s| s.name == name).cloned()
    }

    /// Re-scan the skills root (after an install).
    pub fn reload(&self) {
        if self.skills_root.as_os_str().is_empty() {
            return;
        }
        let skills = scan_skills(&self.skills_root);
        tracing::info!(skills = skills.len(), "skill registry reloaded");
        *self.skills.write() = skills;
    }

    /// Replace the disabled set and persist it.
    pub fn set_disabled(&self, names: Vec<String>) {
        let mut settings = self.settings.write();
        settings.disabled_skills = names;
        if !self.data_dir.as_os_str().is_empty() {
            if let Err(e) = settings.save(&self.data_dir) {
                tracing::warn!(error = %e, "failed to persist skill-settings.json");
            }
        }
    }
}

/// Scan `root/*/skill.toml`, skipping unparseable manifests.
fn scan_skills(root: &Path) -> Vec<SkillTemplate> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return out;
    };
    for entry in entries.flatten() {
        let manifest = entry.path().join("skill.toml");
        if !manifest.is_file() {
            continue;
        }
        match std::fs::read_to_string(&manifest) {
            Ok(raw) => match toml::from_str::<SkillTemplate>(&raw) {
                Ok(skill) => out.push(skill),
                Err(e) => {
                    tracing::warn!(path = %manifest.display(), error = %e, "skipping bad skill manifest");
                }
            },
            Err(e) => {
                tracing::warn!(path = %manifest.display(), error = %e, "unreadable skill manifest");
            }
        }
    }
    out
}
