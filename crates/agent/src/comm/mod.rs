//! Code intercepts and comm fan-out.

pub mod codes;
pub mod fanout;
pub mod friendly;
pub mod service;

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

/// Shared comm-plugin state: connection flag, bot identity, and the
/// cached companion chat.
pub struct CommState {
    connected: AtomicBool,
    bot_id: RwLock<Option<String>>,
    /// Cached session key of the owner's primary chat. A cache, not a
    /// source of truth: egress paths fall back to a session-manager
    /// lookup when it is empty.
    companion_chat: RwLock<Option<String>>,
}

impl CommState {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            bot_id: RwLock::new(None),
            companion_chat: RwLock::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, on: bool) {
        self.connected.store(on, Ordering::Release);
    }

    pub fn bot_id(&self) -> Option<String> {
        self.bot_id.read().clone()
    }

    pub fn set_bot_id(&self, id: &str) {
        *self.bot_id.write() = Some(id.to_owned());
    }

    pub fn companion_chat(&self) -> Option<String> {
        self.companion_chat.read().clone()
    }

    /// Record the owner's primary chat. Called on the first web-UI run.
    pub fn set_companion_chat(&self, session_key: &str) {
        let mut cached = self.companion_chat.write();
        if cached.is_none() {
            *cached = Some(session_key.to_owned());
        }
    }
}

impl Default for CommState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_cache_is_first_writer_wins() {
        let state = CommState::new();
        assert!(state.companion_chat().is_none());
        state.set_companion_chat("chat:first");
        state.set_companion_chat("chat:second");
        assert_eq!(state.companion_chat().as_deref(), Some("chat:first"));
    }

    #[test]
    fn connection_flag() {
        let state = CommState::new();
        assert!(!state.is_connected());
        state.set_connected(true);
        assert!(state.is_connected());
    }
}
