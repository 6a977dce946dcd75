use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lane concurrency and routing settings.
///
/// Caps default per lane in the lane manager; entries here override them.
/// Cap 0 means unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanesConfig {
    /// Per-lane cap overrides, keyed by lane name (`main`, `events`, ...).
    #[serde(default)]
    pub caps: BTreeMap<String, usize>,
    #[serde(default)]
    pub routing: LaneRoutingConfig,
}

/// Per-lane model overrides for background lanes. Main, Subagent, Nested,
/// Desktop, and Dev always use the session/default model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneRoutingConfig {
    /// Model for Heartbeat ticks (cheap model recommended).
    #[serde(default)]
    pub heartbeat_model: Option<String>,
    /// Model for scheduled Events runs.
    #[serde(default)]
    pub events_model: Option<String>,
    /// Model for external Comm traffic.
    #[serde(default)]
    pub comm_model: Option<String>,
}
