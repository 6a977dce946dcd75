use serde::{Deserialize, Serialize};

/// Local server connection settings. The agent dials the control channel
/// at `url` with an http→ws scheme swap plus `control_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the local server (advertised at install time).
    #[serde(default = "d_url")]
    pub url: String,
    /// WebSocket path of the agent control channel.
    #[serde(default = "d_control_path")]
    pub control_path: String,
    /// Keepalive ping interval in seconds.
    #[serde(default = "d_ping")]
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            control_path: d_control_path(),
            ping_interval_secs: d_ping(),
        }
    }
}

impl ServerConfig {
    /// Derive the WebSocket URL by scheme swap (`http→ws`, `https→wss`).
    pub fn ws_url(&self) -> String {
        let swapped = if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.url.clone()
        };
        format!("{}{}", swapped.trim_end_matches('/'), self.control_path)
    }
}

fn d_url() -> String {
    "http://127.0.0.1:9390".into()
}

fn d_control_path() -> String {
    "/agent/ws".into()
}

fn d_ping() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_swap_http() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.ws_url(), "ws://127.0.0.1:9390/agent/ws");
    }

    #[test]
    fn scheme_swap_https() {
        let cfg = ServerConfig {
            url: "https://nebo.local/".into(),
            ..Default::default()
        };
        assert_eq!(cfg.ws_url(), "wss://nebo.local/agent/ws");
    }
}
