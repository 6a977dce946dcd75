//! Agent configuration tree.
//!
//! Loaded from `config.toml` in the data dir; every section has serde
//! defaults so an empty file is a valid configuration. Environment
//! overrides (`NEBO_DATA_DIR`, `NEBO_NO_BROWSER`, `NEBOLOOP_API_SERVER`)
//! are applied by the binary, not here.

mod comm;
mod lanes;
mod policy;
mod recovery;
mod runner;
mod server;
mod voice;

pub use comm::{CommConfig, FriendlyPattern};
pub use lanes::{LaneRoutingConfig, LanesConfig};
pub use policy::PolicyConfig;
pub use recovery::RecoveryConfig;
pub use runner::{AdvisorConfig, PruningConfig, RunnerConfig};
pub use server::ServerConfig;
pub use voice::VoiceConfig;

use serde::{Deserialize, Serialize};

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub section: &'static str,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.section, self.message)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub lanes: LanesConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub comm: CommConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl Config {
    /// Validate cross-field constraints. Errors abort startup; warnings log.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                section: "server",
                message: "server.url must not be empty".into(),
            });
        } else if !self.server.url.starts_with("http://")
            && !self.server.url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                section: "server",
                message: format!("server.url must be http(s), got {}", self.server.url),
            });
        }

        if self.runner.pruning.soft_trim_ratio >= self.runner.pruning.hard_clear_ratio {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                section: "runner.pruning",
                message: "soft_trim_ratio >= hard_clear_ratio; soft trim will never fire alone"
                    .into(),
            });
        }

        if self.runner.advisors.max_advisors > 5 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                section: "runner.advisors",
                message: format!(
                    "max_advisors {} exceeds the supported ceiling of 5; clamping",
                    self.runner.advisors.max_advisors
                ),
            });
        }

        if self.recovery.max_attempts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                section: "recovery",
                message: "max_attempts = 0 means recovered tasks fail immediately".into(),
            });
        }

        issues
    }
}
