//! Skill templates for the Nebo runner.
//!
//! A skill is a reusable prompt fragment with trigger phrases, an optional
//! tool list, and a priority. Skills load from `skill.toml` manifests under
//! the skills root; the disabled set lives in `skill-settings.json` so the
//! UI and agent share it.

pub mod installer;
pub mod registry;
pub mod settings;
pub mod types;

pub use installer::install_bundle;
pub use registry::SkillRegistry;
pub use settings::SkillSettings;
pub use types::SkillTemplate;
