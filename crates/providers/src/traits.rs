use nebo_domain::chat::{Message, ToolDefinition};
use nebo_domain::error::Result;
use nebo_domain::stream::{BoxStream, StreamEvent};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contract every LLM integration implements.
///
/// A provider may be a true streaming HTTP API or a CLI-child-process
/// wrapper; the latter emits composite [`StreamEvent::Message`] envelopes
/// carrying text plus tool results in one unit. Either way the stream must
/// observe the caller's cancellation and close the event stream promptly.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat request and return a stream of events. The stream must
    /// be drained until it ends; dropping it mid-flight wedges the provider.
    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;

    /// Non-streaming convenience: drain the stream and return the full text.
    async fn chat_text(&self, req: ChatRequest) -> Result<String> {
        use futures_util::StreamExt;
        let mut stream = self.chat_stream(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Text { text: chunk } => text.push_str(&chunk),
                StreamEvent::Error { message } => {
                    return Err(nebo_domain::Error::Provider {
                        provider: self.provider_id().to_owned(),
                        message,
                    })
                }
                _ => {}
            }
        }
        Ok(text)
    }
}
