use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::chat::{Message, ToolCall};

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted by the runner while executing a request.
///
/// Consumers: the control channel (stream frames to the web UI), the comm
/// fan-out (chat_stream/tool_start/tool_result frames), and aggregating
/// callers that drain the channel for a final string.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text.
    Text { text: String },

    /// Reasoning content from the model.
    Thinking { text: String },

    /// The model is invoking a tool.
    ToolCall { call: ToolCall },

    /// A tool finished.
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// A composite assistant message. CLI-child-process providers emit these
    /// envelopes carrying text plus tool results in one unit.
    Message {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
    },

    /// An error occurred; the stream ends after this.
    Error { message: String },

    /// Stream is finished.
    Done {
        usage: Option<Usage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
