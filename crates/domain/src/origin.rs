//! Request origin — where a run came from.

use serde::{Deserialize, Serialize};

/// Enumerated source of a run request. Influences prompt framing (channel
/// steering) and whether the user message persists to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// A user chat turn from the web UI.
    #[default]
    User,
    /// A system-initiated run (scheduled job, reminder, recovery).
    System,
    /// An external-agent message via the comm plugin. Non-interactive:
    /// prompt assembly must not invite follow-up questions.
    Comm,
    /// A voice turn (ASR transcript).
    Voice,
}

impl Origin {
    /// System and comm runs do not persist the prompt as a user message.
    pub fn persists_user_message(self) -> bool {
        matches!(self, Origin::User | Origin::Voice)
    }

    /// Non-interactive origins cannot answer clarifying questions.
    pub fn is_interactive(self) -> bool {
        matches!(self, Origin::User | Origin::Voice)
    }
}
