//! Voice duplex: ASR transcripts in, Main-lane runs, TTS text out.
//!
//! The transport (a dedicated WebSocket or multiplexed comm frames) is
//! external; it pumps [`VoiceEvent`]s into the session and reads speakable
//! text from the TTS channel. Voice turns trade off through the Main lane
//! so voice, text, and external input share one serialization point; an
//! interrupt cancels whatever Main is doing.

use tokio::sync::mpsc;

use nebo_domain::error::Result;
use nebo_domain::origin::Origin;
use nebo_domain::stream::StreamEvent;

use crate::lanes::{EnqueueOptions, Lane};
use crate::runtime::{runner, RunRequest};
use crate::state::AgentState;

/// Events pumped in by the voice transport.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// An ASR transcript. Only final transcripts start a turn.
    Transcript { text: String, is_final: bool },
    /// The user spoke over the assistant: cancel the active Main work.
    Interrupt,
    /// Transport closed; the session ends.
    Closed,
}

/// One voice conversation bound to a session key.
pub struct VoiceSession {
    state: AgentState,
    session_key: String,
    user_id: String,
}

impl VoiceSession {
    pub fn new(state: AgentState, session_key: &str, user_id: &str) -> Self {
        Self {
            state,
            session_key: session_key.to_owned(),
            user_id: user_id.to_owned(),
        }
    }

    /// Drive the session until the transport closes. Final transcripts
    /// enqueue Main-lane runs whose text chunks stream to `tts`; the
    /// event loop keeps running while a turn is in flight so interrupts
    /// land immediately.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<VoiceEvent>,
        tts: mpsc::Sender<String>,
    ) -> Result<()> {
        while let Some(event) = events.recv().await {
            match event {
                VoiceEvent::Transcript { text, is_final } => {
                    if !is_final || text.trim().is_empty() {
                        continue;
                    }
                    self.start_turn(text, tts.clone());
                }
                VoiceEvent::Interrupt => {
                    let cancelled = self.state.lanes.cancel_active(Lane::Main);
                    tracing::debug!(cancelled, "voice interrupt");
                }
                VoiceEvent::Closed => break,
            }
        }
        Ok(())
    }

    fn start_turn(&self, text: String, tts: mpsc::Sender<String>) {
        let state = self.state.clone();
        let session_key = self.session_key.clone();
        let user_id = self.user_id.clone();

        self.state.lanes.enqueue_async(
            Lane::Main,
            EnqueueOptions::described(format!("Voice: {}", preview(&text))),
            Box::new(move |token| {
                Box::pin(async move {
                    let req = RunRequest {
                        session_key,
                        user_id,
                        prompt: text,
                        system: None,
                        origin: Origin::Voice,
                        lane: Lane::Main,
                        model: None,
                        force_skill: None,
                        skip_memory: false,
                    };
                    let (_run_id, mut rx) = runner::run(state, req, token);
                    // Forward text to the speaker; partial output spoken
                    // before a cancel is simply what the user heard.
                    while let Some(event) = rx.recv().await {
                        if let StreamEvent::Text { text } = event {
                            if tts.send(text).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(())
                })
            }),
        );
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
