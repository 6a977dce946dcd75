//! Deterministic scripted provider for tests.
//!
//! Each call to `chat_stream` pops the next scripted turn and replays its
//! events. With no turns left it emits a single empty `Done`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use nebo_domain::error::Result;
use nebo_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, LlmProvider};

/// One scripted provider turn: the events replayed for one `chat_stream`.
pub type ScriptedTurn = Vec<StreamEvent>;

pub struct ScriptedProvider {
    id: String,
    turns: Arc<Mutex<VecDeque<ScriptedTurn>>>,
    /// Requests seen, for assertions on message assembly.
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            id: "scripted".into(),
            turns: Arc::new(Mutex::new(turns.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn named(id: &str) -> Self {
        let mut p = Self::new(Vec::new());
        p.id = id.to_owned();
        p
    }

    /// A provider that answers every request with one text chunk then Done.
    pub fn always_says(text: &str) -> Self {
        let mut p = Self::new(Vec::new());
        p.turns.lock().push_back(vec![
            StreamEvent::Text { text: text.to_owned() },
            StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                }),
                finish_reason: Some("stop".into()),
            },
        ]);
        p
    }

    /// Requests the provider has received so far.
    pub fn seen_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req);
        let turn = self.turns.lock().pop_front().unwrap_or_else(|| {
            vec![StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            }]
        });

        let stream = async_stream::stream! {
            for event in turn {
                // Yield point between events so cancellation checks interleave.
                tokio::task::yield_now().await;
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
