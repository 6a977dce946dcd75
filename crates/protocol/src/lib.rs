//! Control-channel protocol: the duplex frame envelope between the local
//! server and the agent process, newline-framed JSON over a WebSocket.
//!
//! The server sends `req` frames (and approval/ask responses); the agent
//! answers with `res`, interleaves `stream` frames while a run is live,
//! and pushes unsolicited `event` frames in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One control-channel message. The `type` tag selects the dispatch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Server → agent: a request expecting exactly one `res`.
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },

    /// Agent → server: terminal answer to a `req`.
    Res {
        id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Agent → server: incremental run output keyed by the `req` id.
    Stream { id: String, payload: StreamPayload },

    /// Unsolicited notification, either direction.
    Event {
        method: String,
        #[serde(default)]
        payload: Value,
    },

    /// Agent → server: a tool call awaits the user's decision.
    ApprovalRequest { id: String, payload: ApprovalRequestPayload },

    /// Server → agent: the user's decision.
    ApprovalResponse { id: String, payload: ApprovalResponsePayload },

    /// Agent → server: an interactive prompt for the user.
    AskRequest { id: String, payload: AskRequestPayload },

    /// Server → agent: the user's answer.
    AskResponse { id: String, payload: AskResponsePayload },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incremental run output. Exactly one logical field group is populated
/// per frame; unset fields are omitted on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Assistant text delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    /// Tool name when a tool call starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Tool input when a tool call starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Tool output when a tool call finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Reasoning delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl StreamPayload {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            chunk: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            thinking: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_start(tool: impl Into<String>, tool_id: impl Into<String>, input: Value) -> Self {
        Self {
            tool: Some(tool.into()),
            tool_id: Some(tool_id.into()),
            input: Some(input),
            ..Default::default()
        }
    }

    pub fn tool_result(
        tool_name: impl Into<String>,
        tool_id: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_id: Some(tool_id.into()),
            tool_result: Some(result.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestPayload {
    pub request_id: String,
    pub tool_name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponsePayload {
    pub approved: bool,
    /// When true (shell-style tools), the canonical command joins the
    /// allowlist so identical calls skip prompting.
    #[serde(default)]
    pub always: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequestPayload {
    pub request_id: String,
    pub prompt: String,
    /// Optional widget descriptors, opaque to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widgets: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponsePayload {
    pub request_id: String,
    pub value: String,
}

/// Params for `run`, `generate_title`, and `introduce`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunParams {
    pub session_key: String,
    pub user_id: String,
    #[serde(default)]
    pub prompt: String,
    /// System prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessagesParams {
    pub channel_id: String,
    #[serde(default = "d_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendChannelMessageParams {
    pub channel_id: String,
    pub text: String,
}

fn d_limit() -> usize {
    50
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Method names
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inbound `req` methods.
pub mod methods {
    pub const PING: &str = "ping";
    pub const RUN: &str = "run";
    pub const GENERATE_TITLE: &str = "generate_title";
    pub const INTRODUCE: &str = "introduce";
    pub const CANCEL: &str = "cancel";
    pub const GET_LANES: &str = "get_lanes";
    pub const GET_LOOPS: &str = "get_loops";
    pub const GET_CHANNEL_MESSAGES: &str = "get_channel_messages";
    pub const SEND_CHANNEL_MESSAGE: &str = "send_channel_message";
}

/// `event` methods, both directions.
pub mod events {
    // Server → agent
    pub const READY: &str = "ready";
    pub const SETTINGS_UPDATED: &str = "settings_updated";
    pub const INTEGRATIONS_CHANGED: &str = "integrations_changed";

    // Agent → server
    pub const LANE_UPDATE: &str = "lane_update";
    pub const UPDATE_AVAILABLE: &str = "update_available";
    pub const UPDATE_PROGRESS: &str = "update_progress";
    pub const UPDATE_READY: &str = "update_ready";
    pub const UPDATE_ERROR: &str = "update_error";
    pub const REMINDER_COMPLETE: &str = "reminder_complete";
    pub const APP_QUARANTINED: &str = "app_quarantined";
    pub const CHAT_STREAM: &str = "chat_stream";
    pub const TOOL_START: &str = "tool_start";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const THINKING: &str = "thinking";
    pub const CHAT_COMPLETE: &str = "chat_complete";
    pub const DM_USER_MESSAGE: &str = "dm_user_message";
    pub const PLAN_CHANGED: &str = "plan_changed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn req_frame_roundtrip() {
        let json = r#"{"type":"req","id":"1","method":"ping","params":{}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::Req { id, method, .. } => {
                assert_eq!(id, "1");
                assert_eq!(method, methods::PING);
            }
            _ => panic!("expected Req"),
        }
    }

    #[test]
    fn res_omits_unset_fields() {
        let frame = Frame::Res {
            id: "1".into(),
            ok: true,
            payload: Some(serde_json::json!({"pong": true})),
            error: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"res\""));
        assert!(!json.contains("error"));
    }

    #[test]
    fn approval_response_defaults_always_false() {
        let json = r#"{"type":"approval_response","id":"a1","payload":{"approved":true}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::ApprovalResponse { payload, .. } => {
                assert!(payload.approved);
                assert!(!payload.always);
            }
            _ => panic!("expected ApprovalResponse"),
        }
    }

    #[test]
    fn stream_payload_chunk_wire_shape() {
        let frame = Frame::Stream {
            id: "r1".into(),
            payload: StreamPayload::chunk("hello"),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"chunk\":\"hello\""));
        assert!(!json.contains("tool_result"));
    }

    #[test]
    fn unknown_method_still_parses() {
        // Dispatch decides what to do with unknown methods; parsing must not fail.
        let json = r#"{"type":"req","id":"9","method":"brew_coffee","params":{}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame, Frame::Req { .. }));
    }
}
