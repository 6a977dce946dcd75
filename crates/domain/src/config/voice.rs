use serde::{Deserialize, Serialize};

/// Voice duplex settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Silence gap, milliseconds, after which a partial transcript is
    /// treated as a completed utterance.
    #[serde(default = "d_1200")]
    pub utterance_gap_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            utterance_gap_ms: d_1200(),
        }
    }
}

fn d_1200() -> u64 {
    1_200
}
