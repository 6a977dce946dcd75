use serde::{Deserialize, Serialize};

/// Task recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Attempts before a recovered task is marked failed.
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    /// Terminal records older than this are evicted.
    #[serde(default = "d_168")]
    pub retention_hours: i64,
    /// How often the cleanup timer fires, seconds.
    #[serde(default = "d_3600")]
    pub cleanup_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_3(),
            retention_hours: d_168(),
            cleanup_interval_secs: d_3600(),
        }
    }
}

fn d_3() -> u32 {
    3
}
fn d_168() -> i64 {
    168
}
fn d_3600() -> u64 {
    3_600
}
