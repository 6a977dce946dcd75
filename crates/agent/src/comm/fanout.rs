//! Owner message fan-out.
//!
//! An owner-originated message arriving over the external comm channel
//! must show up everywhere the owner is looking: the web UI (live
//! frames), the originating comm channel (aggregated reply), and the
//! first loop channel (mirror). All paths share the companion chat
//! session so history stays in one place.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use nebo_domain::error::{Error, Result};
use nebo_domain::origin::Origin;
use nebo_domain::stream::StreamEvent;
use nebo_protocol::events;

use crate::control::channel::FrameSender;
use crate::lanes::{EnqueueOptions, Lane};
use crate::runtime::{runner, RunRequest};
use crate::state::AgentState;

/// Conventional user id of the owner's companion chat. The session
/// manager fallback keys on this when the cache is cold; the coupling is
/// documented upstream and intentionally preserved.
pub const COMPANION_DEFAULT_USER: &str = "companion-default";

/// Resolve the owner's companion chat session key: cached value first,
/// then the newest session for the conventional user id, then the
/// conventional key itself (a fresh session).
pub fn resolve_companion_chat(state: &AgentState) -> String {
    if let Some(cached) = state.comm.companion_chat() {
        return cached;
    }
    if let Some(entry) = state.sessions.latest_for_user(COMPANION_DEFAULT_USER) {
        return entry.session_key;
    }
    COMPANION_DEFAULT_USER.to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Owner fan-out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle an owner message from the comm plugin. Runs on Main with the
/// companion session, streams to the web UI, then echoes the aggregated
/// result to the originating channel and mirrors it to the first loop
/// channel. Returns the aggregated text.
pub async fn handle_owner_message(
    state: &AgentState,
    origin_channel: &str,
    text: &str,
) -> Result<String> {
    let session_key = resolve_companion_chat(state);
    let sender = state.sender();

    // 1. The web UI shows the owner's message live.
    if let Some(s) = &sender {
        let _ = s
            .event(
                events::DM_USER_MESSAGE,
                serde_json::json!({ "session_key": session_key, "text": text }),
            )
            .await;
    }

    // 2. Run on Main with the companion session.
    let (result_tx, result_rx) = oneshot::channel::<Result<String>>();
    let run_state = state.clone();
    let run_session = session_key.clone();
    let run_text = text.to_owned();
    let run_sender = sender.clone();

    state
        .lanes
        .enqueue(
            Lane::Main,
            EnqueueOptions::described(format!("DM: {}", preview(text))),
            Box::new(move |token| {
                Box::pin(async move {
                    let outcome = stream_owner_run(
                        run_state,
                        run_sender,
                        &run_session,
                        &run_text,
                        token,
                    )
                    .await;
                    let failed = outcome.is_err();
                    let _ = result_tx.send(outcome);
                    if failed {
                        Err(Error::Other("owner run failed".into()))
                    } else {
                        Ok(())
                    }
                })
            }),
        )
        .await
        .ok();

    let result = result_rx.await.unwrap_or(Err(Error::Cancelled))?;

    // 3. Echo the aggregated reply to the originating channel.
    if let Err(e) = state
        .loop_service
        .send_channel_message(origin_channel, &result)
        .await
    {
        tracing::warn!(channel = origin_channel, error = %e, "comm echo failed");
    }

    // 4. Mirror to the first loop channel, even when it is the channel
    // already echoed in step 3.
    match state.loop_service.list_loops().await {
        Ok(loops) => {
            let mirror = loops.first().and_then(|l| l.channels.first());
            if let Some(channel) = mirror {
                if let Err(e) = state
                    .loop_service
                    .send_channel_message(&channel.id, &result)
                    .await
                {
                    tracing::warn!(channel = %channel.id, error = %e, "loop mirror failed");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not enumerate loops for mirroring"),
    }

    Ok(result)
}

/// Execute the Main-lane run and fan every event to the web UI surface.
async fn stream_owner_run(
    state: AgentState,
    sender: Option<FrameSender>,
    session_key: &str,
    text: &str,
    token: CancellationToken,
) -> Result<String> {
    let req = RunRequest {
        session_key: session_key.to_owned(),
        user_id: COMPANION_DEFAULT_USER.to_owned(),
        prompt: text.to_owned(),
        system: None,
        origin: Origin::User,
        lane: Lane::Main,
        model: None,
        force_skill: None,
        skip_memory: false,
    };

    let (run_id, mut rx) = runner::run(state.clone(), req, token);
    let mut aggregated = String::new();
    let mut error: Option<String> = None;

    while let Some(event) = rx.recv().await {
        match &event {
            StreamEvent::Text { text } => {
                aggregated.push_str(text);
                emit(&sender, events::CHAT_STREAM, serde_json::json!({
                    "session_key": session_key,
                    "chunk": text,
                }))
                .await;
            }
            StreamEvent::Thinking { text } => {
                emit(&sender, events::THINKING, serde_json::json!({
                    "session_key": session_key,
                    "thinking": text,
                }))
                .await;
            }
            StreamEvent::ToolCall { call } => {
                emit(&sender, events::TOOL_START, serde_json::json!({
                    "session_key": session_key,
                    "tool": call.tool_name,
                    "tool_id": call.call_id,
                    "input": call.arguments,
                }))
                .await;
            }
            StreamEvent::ToolResult {
                call_id,
                tool_name,
                content,
                ..
            } => {
                emit(&sender, events::TOOL_RESULT, serde_json::json!({
                    "session_key": session_key,
                    "tool_name": tool_name,
                    "tool_id": call_id,
                    "tool_result": content,
                }))
                .await;
            }
            StreamEvent::Error { message } => error = Some(message.clone()),
            _ => {}
        }
    }

    emit(&sender, events::CHAT_COMPLETE, serde_json::json!({
        "session_key": session_key,
        "result": aggregated,
    }))
    .await;

    state
        .run_log
        .advance(&run_id, crate::runtime::runlog::RunState::Done);

    match error {
        Some(message) if aggregated.is_empty() => Err(Error::Other(message)),
        _ => Ok(aggregated),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// External (non-owner) traffic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle an external-agent message: Comm lane, a per-peer session key,
/// and a non-interactive origin. The reply goes back to the originating
/// channel only.
pub async fn handle_external_message(
    state: &AgentState,
    peer_id: &str,
    channel_id: &str,
    text: &str,
) -> Result<String> {
    let session_key = format!("comm:{peer_id}");
    let (result_tx, result_rx) = oneshot::channel::<Result<String>>();
    let run_state = state.clone();
    let run_text = text.to_owned();
    let run_session = session_key.clone();
    let peer = peer_id.to_owned();

    state
        .lanes
        .enqueue(
            Lane::Comm,
            EnqueueOptions::described(format!("Comm: {}", preview(text))),
            Box::new(move |token| {
                Box::pin(async move {
                    let req = RunRequest {
                        session_key: run_session,
                        user_id: peer,
                        prompt: run_text,
                        system: None,
                        origin: Origin::Comm,
                        lane: Lane::Comm,
                        model: None,
                        force_skill: None,
                        skip_memory: false,
                    };
                    let (_run_id, rx) = runner::run(run_state, req, token);
                    let outcome = runner::collect_text(rx).await;
                    let failed = outcome.is_err();
                    let _ = result_tx.send(outcome);
                    if failed {
                        Err(Error::Other("comm run failed".into()))
                    } else {
                        Ok(())
                    }
                })
            }),
        )
        .await
        .ok();

    let result = result_rx.await.unwrap_or(Err(Error::Cancelled))?;
    state
        .loop_service
        .send_channel_message(channel_id, &result)
        .await?;
    Ok(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn emit(sender: &Option<FrameSender>, method: &str, payload: serde_json::Value) {
    if let Some(s) = sender {
        if let Err(e) = s.event(method, payload).await {
            tracing::warn!(method, error = %e, "failed to emit comm event frame");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::service::{ChannelInfo, LoopInfo};
    use crate::test_support::{test_state_with, mock_service};
    use nebo_protocol::Frame;
    use nebo_providers::ScriptedProvider;

    #[tokio::test]
    async fn owner_fanout_streams_and_echoes() {
        let service = mock_service();
        service.loops.lock().push(LoopInfo {
            id: "loop-1".into(),
            name: "Family".into(),
            channels: vec![ChannelInfo {
                id: "chan-loop".into(),
                name: "general".into(),
            }],
        });
        let state = test_state_with(ScriptedProvider::always_says("hi back"), service.clone());

        let (sender, mut frames) = FrameSender::detached();
        state.attach_sender(sender);
        let collected = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = collected.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                sink.lock().push(frame);
            }
        });

        let result = handle_owner_message(&state, "chan-dm", "hi").await.unwrap();
        assert_eq!(result, "hi back");

        // Frame sequence: dm_user_message, chat_stream chunks, chat_complete.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let frames = collected.lock();
        let methods: Vec<String> = frames
            .iter()
            .filter_map(|f| match f {
                Frame::Event { method, .. } => Some(method.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(methods.first().map(String::as_str), Some("dm_user_message"));
        assert!(methods.iter().any(|m| m == "chat_stream"));
        assert_eq!(methods.last().map(String::as_str), Some("chat_complete"));

        // Echo to the origin channel plus the loop mirror.
        let sent = service.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], ("chan-dm".to_string(), "hi back".to_string()));
        assert_eq!(sent[1], ("chan-loop".to_string(), "hi back".to_string()));
    }

    #[tokio::test]
    async fn mirror_hits_first_loop_channel_even_when_it_is_the_origin() {
        let service = mock_service();
        service.loops.lock().push(LoopInfo {
            id: "loop-1".into(),
            name: "Family".into(),
            channels: vec![
                ChannelInfo {
                    id: "chan-dm".into(),
                    name: "general".into(),
                },
                ChannelInfo {
                    id: "chan-other".into(),
                    name: "random".into(),
                },
            ],
        });
        let state = test_state_with(ScriptedProvider::always_says("hi back"), service.clone());

        handle_owner_message(&state, "chan-dm", "hi").await.unwrap();

        // The echo and the mirror both target the first loop channel;
        // the second channel is never considered.
        let sent = service.sent.lock();
        assert_eq!(
            sent.as_slice(),
            &[
                ("chan-dm".to_string(), "hi back".to_string()),
                ("chan-dm".to_string(), "hi back".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn owner_run_uses_companion_session() {
        let state = test_state_with(
            ScriptedProvider::always_says("noted"),
            mock_service(),
        );
        handle_owner_message(&state, "chan-dm", "remember this").await.unwrap();

        // The companion session carries both the owner turn and the reply.
        let session_key = resolve_companion_chat(&state);
        let messages = state.sessions.messages(&session_key);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "remember this");
        assert_eq!(messages[1].content, "noted");
    }

    #[tokio::test]
    async fn companion_cache_wins_over_lookup() {
        let state = test_state_with(ScriptedProvider::always_says("x"), mock_service());
        state.sessions.resolve_or_create("chat:web", COMPANION_DEFAULT_USER);
        state.comm.set_companion_chat("chat:cached");
        assert_eq!(resolve_companion_chat(&state), "chat:cached");
    }

    #[tokio::test]
    async fn cold_cache_falls_back_to_session_lookup() {
        let state = test_state_with(ScriptedProvider::always_says("x"), mock_service());
        assert_eq!(resolve_companion_chat(&state), COMPANION_DEFAULT_USER);

        state.sessions.resolve_or_create("chat:web", COMPANION_DEFAULT_USER);
        assert_eq!(resolve_companion_chat(&state), "chat:web");
    }

    #[tokio::test]
    async fn external_message_runs_on_comm_with_peer_session() {
        let service = mock_service();
        let state = test_state_with(ScriptedProvider::always_says("ack"), service.clone());

        let result = handle_external_message(&state, "agent-9", "chan-x", "ping")
            .await
            .unwrap();
        assert_eq!(result, "ack");
        assert_eq!(
            service.sent.lock().as_slice(),
            &[("chan-x".to_string(), "ack".to_string())]
        );

        // Distinct session key; Comm origin does not persist the prompt.
        let messages = state.sessions.messages("comm:agent-9");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
    }
}
