//! Control-channel connection lifecycle.
//!
//! The agent dials the local server's WebSocket (scheme-swapped from its
//! HTTP URL) and runs three tasks per connection: a writer draining the
//! outbound frame channel (the single-writer invariant), a 30 s ping
//! task, and the reader loop. The reader never blocks on work: every
//! frame handler runs on its own tokio task, because an active run
//! awaiting an approval would deadlock the socket otherwise.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use nebo_domain::error::{Error, Result};
use nebo_protocol::{Frame, StreamPayload};

use crate::control::handlers;
use crate::state::AgentState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame sender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle for sending frames. Cloneable; all clones feed the single
/// writer task, which serializes every outbound write.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<Frame>,
}

impl FrameSender {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// A sender wired to an in-memory receiver, for tests and for
    /// egress paths exercised without a live socket.
    pub fn detached() -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(256);
        (Self { tx }, rx)
    }

    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::Channel("control channel closed".into()))
    }

    pub async fn res_ok(&self, id: &str, payload: serde_json::Value) -> Result<()> {
        self.send(Frame::Res {
            id: id.to_owned(),
            ok: true,
            payload: Some(payload),
            error: None,
        })
        .await
    }

    pub async fn res_err(&self, id: &str, message: impl Into<String>) -> Result<()> {
        self.send(Frame::Res {
            id: id.to_owned(),
            ok: false,
            payload: None,
            error: Some(message.into()),
        })
        .await
    }

    pub async fn stream(&self, id: &str, payload: StreamPayload) -> Result<()> {
        self.send(Frame::Stream {
            id: id.to_owned(),
            payload,
        })
        .await
    }

    pub async fn event(&self, method: &str, payload: serde_json::Value) -> Result<()> {
        self.send(Frame::Event {
            method: method.to_owned(),
            payload,
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dial the control channel and run the session until the connection
/// drops or `shutdown` fires. Returns `Ok(())` on a clean shutdown; a
/// connect failure is an error the caller treats as fatal at startup.
pub async fn run_session(state: AgentState, shutdown: CancellationToken) -> Result<()> {
    let url = state.config.server.ws_url();
    tracing::info!(url = %url, "dialing control channel");

    let (ws, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| Error::Channel(format!("connecting to {url}: {e}")))?;
    let (mut sink, mut stream) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);
    let sender = FrameSender::new(outbound_tx);
    state.attach_sender(sender.clone());

    // Writer task: the only place that touches the sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(format!("{json}\n"))).await.is_err() {
                break;
            }
        }
    });

    // Ping task: keeps the peer's read deadline fresh. The transport
    // auto-responds to the peer's pongs.
    let ping_sender = sender.clone();
    let ping_interval = Duration::from_secs(state.config.server.ping_interval_secs);
    let ping_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(ping_interval);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if ping_sender
                .event("ping", serde_json::json!({}))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Reader loop: single-threaded, dispatch only.
    let result = loop {
        let msg = tokio::select! {
            msg = stream.next() => msg,
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested; closing control channel");
                break Ok(());
            }
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<Frame>(line) {
                        Ok(frame) => {
                            let state = state.clone();
                            let sender = sender.clone();
                            // Never block the reader on a handler.
                            tokio::spawn(async move {
                                handlers::dispatch(state, sender, frame).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring malformed frame");
                        }
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                break Err(Error::Channel("server closed the control channel".into()));
            }
            Some(Ok(_)) => {
                // Ping/pong/binary: handled by the transport.
            }
            Some(Err(e)) => {
                break Err(Error::Channel(format!("control channel read: {e}")));
            }
        }
    };

    ping_task.abort();
    writer.abort();
    state.detach_sender();
    result
}
