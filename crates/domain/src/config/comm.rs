use serde::{Deserialize, Serialize};

/// NeboLoop comm settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommConfig {
    /// Remote service base URL. Overridden by `NEBOLOOP_API_SERVER`.
    #[serde(default = "d_api_server")]
    pub api_server: String,
    /// Request timeout for remote service calls, seconds.
    #[serde(default = "d_15")]
    pub request_timeout_secs: u64,
    /// Substring → plain-language mappings for remote error text.
    /// Matched in order; first hit wins.
    #[serde(default = "default_friendly_patterns")]
    pub friendly_messages: Vec<FriendlyPattern>,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            api_server: d_api_server(),
            request_timeout_secs: d_15(),
            friendly_messages: default_friendly_patterns(),
        }
    }
}

/// One substring-match rule of the friendly-message table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendlyPattern {
    /// Case-insensitive substring to look for in the remote error text.
    pub contains: String,
    /// The sentence shown to the user instead.
    pub message: String,
}

fn default_friendly_patterns() -> Vec<FriendlyPattern> {
    [
        ("already a member", "You're already in this loop."),
        ("already redeemed", "That connect code was already used."),
        ("expired", "That code has expired. Ask for a fresh one."),
        ("not found", "That code doesn't match anything on NeboLoop."),
        (
            "not connected",
            "Connect to NeboLoop first with your NEBO connect code.",
        ),
        ("rate limit", "NeboLoop is busy right now. Try again in a minute."),
    ]
    .into_iter()
    .map(|(contains, message)| FriendlyPattern {
        contains: contains.into(),
        message: message.into(),
    })
    .collect()
}

fn d_api_server() -> String {
    "https://api.neboloop.com".into()
}

fn d_15() -> u64 {
    15
}
