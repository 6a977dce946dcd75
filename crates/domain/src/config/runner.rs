use serde::{Deserialize, Serialize};

/// Runner settings: context budget, tool loop bound, pruning, advisors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Character budget for assembled context (history + tool results).
    #[serde(default = "d_400000")]
    pub context_window_chars: usize,
    /// Maximum tool-call loop iterations before force-stop.
    #[serde(default = "d_25")]
    pub max_tool_loops: usize,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub advisors: AdvisorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            context_window_chars: d_400000(),
            max_tool_loops: d_25(),
            pruning: PruningConfig::default(),
            advisors: AdvisorConfig::default(),
        }
    }
}

/// Two-stage context pruning.
///
/// Stage 1 (soft trim): at `soft_trim_ratio` of the budget, unprotected
/// tool results longer than `min_prunable_chars` are cut to head + tail
/// around an elision marker. Stage 2 (hard clear): at `hard_clear_ratio`,
/// unprotected tool results are replaced wholesale by a placeholder.
/// Protected = the last `keep_last_assistants` assistant messages and all
/// user messages. The stages are monotone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    /// Ratio of the context budget at which soft-trim activates.
    #[serde(default = "d_05")]
    pub soft_trim_ratio: f64,
    /// Ratio of the context budget at which hard-clear activates.
    #[serde(default = "d_08")]
    pub hard_clear_ratio: f64,
    /// Number of recent assistant messages whose tool results are protected.
    #[serde(default = "d_3")]
    pub keep_last_assistants: usize,
    /// Only prune tool results longer than this many chars.
    #[serde(default = "d_2000")]
    pub min_prunable_chars: usize,
    /// Chars kept from the head when soft-trimming.
    #[serde(default = "d_800")]
    pub head_chars: usize,
    /// Chars kept from the tail when soft-trimming.
    #[serde(default = "d_800")]
    pub tail_chars: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            soft_trim_ratio: d_05(),
            hard_clear_ratio: d_08(),
            keep_last_assistants: d_3(),
            min_prunable_chars: d_2000(),
            head_chars: d_800(),
            tail_chars: d_800(),
        }
    }
}

/// Advisor deliberation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Whether deliberation runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Upper bound on advisors consulted in parallel (hard ceiling 5).
    #[serde(default = "d_5")]
    pub max_advisors: usize,
    /// Per-advisor timeout in seconds; slow advisors are dropped.
    #[serde(default = "d_10")]
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_advisors: d_5(),
            timeout_secs: d_10(),
        }
    }
}

fn d_400000() -> usize {
    400_000
}
fn d_25() -> usize {
    25
}
fn d_05() -> f64 {
    0.5
}
fn d_08() -> f64 {
    0.8
}
fn d_3() -> usize {
    3
}
fn d_2000() -> usize {
    2_000
}
fn d_800() -> usize {
    800
}
fn d_5() -> usize {
    5
}
fn d_10() -> u64 {
    10
}
