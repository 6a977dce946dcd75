//! Structured prompt codes.
//!
//! Three code families are detected before a prompt reaches the LLM:
//! `NEBO-XXXX-XXXX-XXXX` (connect), `LOOP-XXXX-XXXX-XXXX` (loop invite),
//! `SKILL-XXXX-XXXX-XXXX` (skill install). Parsing is strictly
//! positional; any mismatch falls through to the LLM unchanged.

use crate::comm::friendly;
use crate::control::channel::FrameSender;
use crate::state::AgentState;

use nebo_protocol::StreamPayload;

/// A recognized prompt code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptCode {
    Connect(String),
    LoopInvite(String),
    SkillInstall(String),
}

impl PromptCode {
    /// The pseudo-tool name shown in the intercept stream.
    pub fn tool_name(&self) -> &'static str {
        match self {
            PromptCode::Connect(_) => "neboloop_connect",
            PromptCode::LoopInvite(_) => "neboloop_join",
            PromptCode::SkillInstall(_) => "neboloop_install_skill",
        }
    }

    pub fn code(&self) -> &str {
        match self {
            PromptCode::Connect(c) | PromptCode::LoopInvite(c) | PromptCode::SkillInstall(c) => c,
        }
    }
}

/// Parse a prompt as a code. The whole trimmed prompt must be the code.
pub fn parse(prompt: &str) -> Option<PromptCode> {
    let code = prompt.trim();
    if let Some(body) = code.strip_prefix("NEBO-") {
        if code.len() == 19 && body_is_valid(body) {
            return Some(PromptCode::Connect(code.to_owned()));
        }
    }
    if let Some(body) = code.strip_prefix("LOOP-") {
        if code.len() == 19 && body_is_valid(body) {
            return Some(PromptCode::LoopInvite(code.to_owned()));
        }
    }
    if let Some(body) = code.strip_prefix("SKILL-") {
        if code.len() == 20 && body_is_valid(body) {
            return Some(PromptCode::SkillInstall(code.to_owned()));
        }
    }
    None
}

/// Body shape after the prefix: `XXXX-XXXX-XXXX`, uppercase alphanumeric.
fn body_is_valid(body: &str) -> bool {
    let groups: Vec<&str> = body.split('-').collect();
    groups.len() == 3
        && groups.iter().all(|g| {
            g.len() == 4
                && g.chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intercept execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run an intercepted code: emit a tool-style stream (tool + tool_result
/// + chunk) keyed to the originating `req` id, and return the final chunk
/// text for the `res`. No LLM call is made. Remote errors map through the
/// friendly table; the run still resolves `ok=true` so the UI renders a
/// card instead of a failure.
pub async fn run_intercept(
    state: &AgentState,
    sender: &FrameSender,
    req_id: &str,
    code: PromptCode,
) -> String {
    let tool = code.tool_name();
    let _ = sender
        .stream(
            req_id,
            StreamPayload::tool_start(tool, req_id, serde_json::json!({ "code": code.code() })),
        )
        .await;

    let outcome = execute(state, &code).await;
    let message = match outcome {
        Ok(message) => message,
        Err(e) => friendly::map(&state.config.comm.friendly_messages, &e.to_string()),
    };

    let _ = sender
        .stream(req_id, StreamPayload::tool_result(tool, req_id, message.clone()))
        .await;
    let _ = sender
        .stream(req_id, StreamPayload::chunk(message.clone()))
        .await;

    message
}

async fn execute(state: &AgentState, code: &PromptCode) -> nebo_domain::Result<String> {
    match code {
        PromptCode::Connect(code) => {
            let bot_id = state
                .comm
                .bot_id()
                .ok_or_else(|| nebo_domain::Error::Other("bot identity not ready".into()))?;
            let info = state.loop_service.redeem_connect_code(code, &bot_id).await?;
            state.comm.set_connected(true);
            tracing::info!(loop_name = %info.loop_name, "connected to NeboLoop");
            Ok(format!("Connected! You're now part of {}.", info.loop_name))
        }
        PromptCode::LoopInvite(code) => {
            if !state.comm.is_connected() {
                return Err(nebo_domain::Error::NotConnected);
            }
            let info = state.loop_service.join_loop(code).await?;
            Ok(format!("Joined the loop \"{}\".", info.name))
        }
        PromptCode::SkillInstall(code) => {
            let bundle = state.loop_service.fetch_skill_bundle(code).await?;
            let skills_root = state.data_dir.join("skills");
            nebo_skills::install_bundle(&skills_root, &bundle.name, bundle.data.as_slice())?;
            state.skills.reload();
            Ok(format!("Skill \"{}\" installed and ready.", bundle.name))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
