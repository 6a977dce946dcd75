//! Inbound frame dispatch.
//!
//! Every frame arrives here on its own task (the reader never blocks).
//! `req` frames get exactly one `res`; a run additionally interleaves
//! `stream` frames keyed by the request id.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use nebo_domain::chat::{ContentPart, MessageContent};
use nebo_domain::error::Error;
use nebo_domain::stream::StreamEvent;
use nebo_protocol::{methods, ChannelMessagesParams, Frame, RunParams, SendChannelMessageParams, StreamPayload};

use crate::comm::codes;
use crate::control::channel::FrameSender;
use crate::lanes::{EnqueueOptions, Lane};
use crate::runtime::{runlog::RunState, runner, RunRequest};
use crate::state::AgentState;

/// Top-level dispatch for one inbound frame.
pub async fn dispatch(state: AgentState, sender: FrameSender, frame: Frame) {
    match frame {
        Frame::Req { id, method, params } => {
            handle_req(state, sender, id, method, params).await;
        }
        Frame::ApprovalResponse { id, payload } => {
            state.approvals.resolve(&id, payload);
        }
        Frame::AskResponse { payload, .. } => {
            let request_id = payload.request_id.clone();
            state.asks.resolve(&request_id, payload);
        }
        Frame::Event { method, payload } => {
            handle_event(state, &method, payload);
        }
        other => {
            tracing::debug!(frame = ?std::mem::discriminant(&other), "unexpected inbound frame");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// req dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_req(
    state: AgentState,
    sender: FrameSender,
    id: String,
    method: String,
    params: serde_json::Value,
) {
    tracing::debug!(id = %id, method = %method, "handling req");
    let result = match method.as_str() {
        methods::PING => {
            sender.res_ok(&id, json!({ "pong": true })).await
        }
        methods::RUN => handle_run(&state, &sender, &id, params).await,
        methods::GENERATE_TITLE => handle_generate_title(&state, &sender, &id, params).await,
        methods::INTRODUCE => handle_introduce(&state, &sender, &id, params).await,
        methods::CANCEL => {
            let cancelled = state.lanes.cancel_active(Lane::Main);
            sender.res_ok(&id, json!({ "cancelled": cancelled })).await
        }
        methods::GET_LANES => {
            let stats = state.lanes.stats();
            sender.res_ok(&id, serde_json::to_value(stats).unwrap_or_default()).await
        }
        methods::GET_LOOPS => handle_get_loops(&state, &sender, &id).await,
        methods::GET_CHANNEL_MESSAGES => {
            match serde_json::from_value::<ChannelMessagesParams>(params) {
                Ok(p) => match state.loop_service.channel_messages(&p.channel_id, p.limit).await {
                    Ok(history) => {
                        sender
                            .res_ok(&id, serde_json::to_value(history).unwrap_or_default())
                            .await
                    }
                    Err(e) => sender.res_err(&id, e.to_string()).await,
                },
                Err(e) => sender.res_err(&id, format!("bad params: {e}")).await,
            }
        }
        methods::SEND_CHANNEL_MESSAGE => {
            match serde_json::from_value::<SendChannelMessageParams>(params) {
                Ok(p) => match state.loop_service.send_channel_message(&p.channel_id, &p.text).await {
                    Ok(()) => sender.res_ok(&id, json!({ "success": true })).await,
                    Err(e) => sender.res_err(&id, e.to_string()).await,
                },
                Err(e) => sender.res_err(&id, format!("bad params: {e}")).await,
            }
        }
        unknown => {
            sender
                .res_err(&id, format!("unknown method: {unknown}"))
                .await
        }
    };

    if let Err(e) = result {
        tracing::warn!(id = %id, method = %method, error = %e, "failed to answer req");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_run(
    state: &AgentState,
    sender: &FrameSender,
    id: &str,
    params: serde_json::Value,
) -> nebo_domain::Result<()> {
    let params: RunParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return sender.res_err(id, format!("bad params: {e}")).await,
    };

    // Code intercepts never reach the LLM.
    if let Some(code) = codes::parse(&params.prompt) {
        let message = codes::run_intercept(state, sender, id, code).await;
        return sender.res_ok(id, json!({ "result": message })).await;
    }

    // The first web-UI run names the owner's companion chat.
    state.comm.set_companion_chat(&params.session_key);

    let req = RunRequest {
        session_key: params.session_key.clone(),
        user_id: params.user_id.clone(),
        prompt: params.prompt.clone(),
        system: params.system.clone(),
        origin: nebo_domain::origin::Origin::User,
        lane: Lane::Main,
        model: None,
        force_skill: None,
        skip_memory: false,
    };

    let run_state = state.clone();
    let run_sender = sender.clone();
    let req_id = id.to_owned();
    let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();

    state
        .lanes
        .enqueue(
            Lane::Main,
            EnqueueOptions::described(format!("Run: {}", preview(&params.prompt))),
            Box::new(move |token| {
                Box::pin(async move {
                    let outcome =
                        stream_run_to_frames(run_state, run_sender, &req_id, req, token).await;
                    let failed = outcome.is_err();
                    let _ = outcome_tx.send(outcome);
                    if failed {
                        Err(Error::Other("run failed".into()))
                    } else {
                        Ok(())
                    }
                })
            }),
        )
        .await
        .ok();

    match outcome_rx.await.unwrap_or(Err(Error::Cancelled)) {
        Ok(result) => sender.res_ok(id, json!({ "result": result })).await,
        Err(e) => sender.res_err(id, e.to_string()).await,
    }
}

/// Drain a run's events into `stream` frames keyed by the req id, and
/// return the aggregated text. A cancelled run resolves with its partial
/// text; a failed run propagates the error for a `res.ok=false`.
async fn stream_run_to_frames(
    state: AgentState,
    sender: FrameSender,
    req_id: &str,
    req: RunRequest,
    token: CancellationToken,
) -> nebo_domain::Result<String> {
    let (run_id, mut rx) = runner::run(state.clone(), req, token);
    let mut aggregated = String::new();
    let mut error: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Text { text } => {
                aggregated.push_str(&text);
                let _ = sender.stream(req_id, StreamPayload::chunk(text)).await;
            }
            StreamEvent::Thinking { text } => {
                let _ = sender.stream(req_id, StreamPayload::thinking(text)).await;
            }
            StreamEvent::ToolCall { call } => {
                let _ = sender
                    .stream(
                        req_id,
                        StreamPayload::tool_start(&call.tool_name, &call.call_id, call.arguments),
                    )
                    .await;
            }
            StreamEvent::ToolResult {
                call_id,
                tool_name,
                content,
                ..
            } => {
                let _ = sender
                    .stream(req_id, StreamPayload::tool_result(tool_name, call_id, content))
                    .await;
            }
            StreamEvent::Message { message, image_url } => {
                let text = composite_text(&message);
                if !text.is_empty() {
                    aggregated.push_str(&text);
                    let _ = sender.stream(req_id, StreamPayload::chunk(text)).await;
                }
                if let Some(url) = image_url {
                    let _ = sender
                        .stream(
                            req_id,
                            StreamPayload {
                                image_url: Some(url),
                                ..Default::default()
                            },
                        )
                        .await;
                }
            }
            StreamEvent::Error { message } => error = Some(message),
            StreamEvent::Done { .. } => {}
        }
    }

    state.run_log.advance(&run_id, RunState::Done);

    match error {
        Some(message) => Err(Error::Other(message)),
        None => Ok(aggregated),
    }
}

fn composite_text(message: &nebo_domain::chat::Message) -> String {
    match &message.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// generate_title / introduce
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const TITLE_SYSTEM: &str = "Produce a short title (at most five words) for a \
chat that starts with the following message. Reply with the title only, no \
quotes or punctuation around it.";

async fn handle_generate_title(
    state: &AgentState,
    sender: &FrameSender,
    id: &str,
    params: serde_json::Value,
) -> nebo_domain::Result<()> {
    let params: RunParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return sender.res_err(id, format!("bad params: {e}")).await,
    };

    let req = RunRequest {
        session_key: format!("title:{}", params.session_key),
        user_id: params.user_id,
        prompt: params.prompt,
        system: Some(TITLE_SYSTEM.to_owned()),
        origin: nebo_domain::origin::Origin::System,
        lane: Lane::Main,
        model: None,
        force_skill: None,
        skip_memory: true,
    };

    // Titles run outside the lanes: they are short, read-only, and must
    // not queue behind the user's own turn.
    let (_run_id, rx) = runner::run(state.clone(), req, CancellationToken::new());
    match runner::collect_text(rx).await {
        Ok(title) => {
            let title = title.trim().to_owned();
            state.sessions.set_title(&params.session_key, &title);
            sender.res_ok(id, json!({ "result": title })).await
        }
        Err(e) => sender.res_err(id, e.to_string()).await,
    }
}

const INTRODUCE_PROMPT: &str = "Introduce yourself to a brand-new user in two \
or three friendly sentences. Mention that you can use tools on their machine \
and that they can connect you to NeboLoop with a connect code.";

async fn handle_introduce(
    state: &AgentState,
    sender: &FrameSender,
    id: &str,
    params: serde_json::Value,
) -> nebo_domain::Result<()> {
    let params: RunParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return sender.res_err(id, format!("bad params: {e}")).await,
    };

    let (entry, _created) = state
        .sessions
        .resolve_or_create(&params.session_key, &params.user_id);

    // A session with history does not get re-introduced.
    if state.sessions.has_messages(&params.session_key) {
        return sender
            .res_ok(id, json!({
                "result": "",
                "session_id": entry.session_id,
                "skipped": true,
            }))
            .await;
    }

    let req = RunRequest {
        session_key: params.session_key.clone(),
        user_id: params.user_id,
        prompt: INTRODUCE_PROMPT.to_owned(),
        system: None,
        origin: nebo_domain::origin::Origin::System,
        lane: Lane::Main,
        model: None,
        force_skill: None,
        skip_memory: false,
    };

    // The greeting serializes with user turns on Main like any other
    // session-touching run.
    let run_state = state.clone();
    let (outcome_tx, outcome_rx) = tokio::sync::oneshot::channel();
    state
        .lanes
        .enqueue(
            Lane::Main,
            EnqueueOptions::described(format!("Introduce: {}", params.session_key)),
            Box::new(move |token| {
                Box::pin(async move {
                    let (_run_id, rx) = runner::run(run_state, req, token);
                    let outcome = runner::collect_text(rx).await;
                    let failed = outcome.is_err();
                    let _ = outcome_tx.send(outcome);
                    if failed {
                        Err(Error::Other("introduce run failed".into()))
                    } else {
                        Ok(())
                    }
                })
            }),
        )
        .await
        .ok();

    match outcome_rx.await.unwrap_or(Err(Error::Cancelled)) {
        Ok(result) => {
            sender
                .res_ok(id, json!({ "result": result, "session_id": entry.session_id }))
                .await
        }
        Err(e) => sender.res_err(id, e.to_string()).await,
    }
}

async fn handle_get_loops(
    state: &AgentState,
    sender: &FrameSender,
    id: &str,
) -> nebo_domain::Result<()> {
    let loops = match state.loop_service.list_loops().await {
        Ok(loops) => loops,
        Err(e) => {
            tracing::warn!(error = %e, "get_loops: remote enumeration failed");
            Vec::new()
        }
    };
    let stats = state.lanes.stats();
    sender
        .res_ok(id, json!({
            "loops": loops,
            "heartbeat_active": stats[&Lane::Heartbeat].active > 0,
            "events_active": stats[&Lane::Events].active > 0,
            "desktop_active": stats[&Lane::Desktop].active > 0,
        }))
        .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// event dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn handle_event(state: AgentState, method: &str, payload: serde_json::Value) {
    match method {
        nebo_protocol::events::READY => {
            tracing::info!("server reported ready");
        }
        nebo_protocol::events::SETTINGS_UPDATED => {
            if let Some(autonomous) = payload.get("autonomous").and_then(|v| v.as_bool()) {
                state.policy.set_autonomous(autonomous);
                tracing::info!(autonomous, "autonomy toggled");
            }
            if let Some(disabled) = payload.get("disabledSkills").and_then(|v| v.as_array()) {
                let names = disabled
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
                state.skills.set_disabled(names);
            }
        }
        nebo_protocol::events::INTEGRATIONS_CHANGED => {
            tracing::info!("integrations changed; reloading skills");
            state.skills.reload();
        }
        other => {
            tracing::debug!(method = other, "ignoring unknown event");
        }
    }
}

fn preview(text: &str) -> String {
    let mut end = text.len().min(40);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
