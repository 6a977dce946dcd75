//! NeboLoop remote service client.
//!
//! The external comm service is a black box behind this trait: code
//! redemption, loop membership, channel traffic, and skill bundles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use nebo_domain::config::CommConfig;
use nebo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectInfo {
    /// Name of the loop the bot was connected into.
    pub loop_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelHistory {
    pub messages: Vec<ChannelMessage>,
    pub members: Vec<String>,
}

/// A downloaded skill bundle (gzipped tarball).
#[derive(Debug, Clone)]
pub struct SkillBundle {
    pub name: String,
    pub data: Vec<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait LoopService: Send + Sync {
    /// Redeem a connect code, registering this bot with the service.
    async fn redeem_connect_code(&self, code: &str, bot_id: &str) -> Result<ConnectInfo>;

    /// Join a loop via an invite code. Requires an existing connection.
    async fn join_loop(&self, code: &str) -> Result<LoopInfo>;

    /// Download a skill bundle for an install code.
    async fn fetch_skill_bundle(&self, code: &str) -> Result<SkillBundle>;

    /// Send a message into a loop channel.
    async fn send_channel_message(&self, channel_id: &str, text: &str) -> Result<()>;

    /// Enumerate loops (and their channels) this bot belongs to.
    async fn list_loops(&self) -> Result<Vec<LoopInfo>>;

    /// Recent history for a channel.
    async fn channel_messages(&self, channel_id: &str, limit: usize) -> Result<ChannelHistory>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpLoopService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLoopService {
    /// Build from config; `NEBOLOOP_API_SERVER` overrides the base URL.
    pub fn from_config(config: &CommConfig) -> Self {
        let base_url = std::env::var("NEBOLOOP_API_SERVER")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| config.api_server.clone());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a non-success response to `Error::Http` carrying the remote
    /// body text, which the friendly-message table matches against.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Http(format!("HTTP {status}: {body}")))
    }
}

#[async_trait::async_trait]
impl LoopService for HttpLoopService {
    async fn redeem_connect_code(&self, code: &str, bot_id: &str) -> Result<ConnectInfo> {
        let response = self
            .client
            .post(self.url("/v1/bots/connect"))
            .json(&serde_json::json!({ "code": code, "bot_id": bot_id }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn join_loop(&self, code: &str) -> Result<LoopInfo> {
        let response = self
            .client
            .post(self.url("/v1/loops/join"))
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn fetch_skill_bundle(&self, code: &str) -> Result<SkillBundle> {
        let response = self
            .client
            .get(self.url(&format!("/v1/skills/bundles/{code}")))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let response = Self::check(response).await?;

        let name = response
            .headers()
            .get("x-nebo-skill-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("skill")
            .to_owned();
        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .to_vec();
        Ok(SkillBundle { name, data })
    }

    async fn send_channel_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/channels/{channel_id}/messages")))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn list_loops(&self) -> Result<Vec<LoopInfo>> {
        let response = self
            .client
            .get(self.url("/v1/loops"))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    async fn channel_messages(&self, channel_id: &str, limit: usize) -> Result<ChannelHistory> {
        let response = self
            .client
            .get(self.url(&format!(
                "/v1/channels/{channel_id}/messages?limit={limit}"
            )))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test double
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
