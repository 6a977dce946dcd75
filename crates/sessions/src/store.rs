//! Agent-visible session store.
//!
//! Session state lives in `sessions.json` under the data dir; each session
//! id gets an append-only `<sessionId>.jsonl` transcript. The store is
//! shared with the local server process through the common data dir, so
//! every mutation writes through to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use nebo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: String,
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Number of messages appended to the transcript.
    #[serde(default)]
    pub message_count: u64,
}

/// One transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SessionMessage {
    pub fn now(role: &str, content: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            role: role.to_owned(),
            content: content.to_owned(),
            metadata: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session store backed by `sessions.json` + per-session JSONL transcripts.
pub struct SessionManager {
    sessions_path: PathBuf,
    transcripts_dir: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    /// Load or create the store under `data_dir/sessions`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let sessions_path = dir.join("sessions.json");
        let sessions: HashMap<String, SessionEntry> = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            transcripts_dir: dir,
            sessions: RwLock::new(sessions),
        })
    }

    /// Look up a session by its key.
    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or create a session for the given key. Returns `(entry, is_new)`.
    pub fn resolve_or_create(&self, session_key: &str, user_id: &str) -> (SessionEntry, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(session_key) {
                return (entry.clone(), false);
            }
        }

        let now = Utc::now();
        let entry = SessionEntry {
            session_key: session_key.to_owned(),
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            created_at: now,
            updated_at: now,
            title: None,
            input_tokens: 0,
            output_tokens: 0,
            message_count: 0,
        };

        {
            let mut sessions = self.sessions.write();
            // Re-check under the write lock; another caller may have raced us.
            if let Some(existing) = sessions.get(session_key) {
                return (existing.clone(), false);
            }
            sessions.insert(session_key.to_owned(), entry.clone());
            self.flush_locked(&sessions);
        }

        tracing::debug!(session_key, session_id = %entry.session_id, "session created");
        (entry, true)
    }

    /// Most recently updated session for a user id. This is the deterministic
    /// fallback the comm egress paths use when the companion-chat cache is
    /// cold.
    pub fn latest_for_user(&self, user_id: &str) -> Option<SessionEntry> {
        self.sessions
            .read()
            .values()
            .filter(|e| e.user_id == user_id)
            .max_by_key(|e| e.updated_at)
            .cloned()
    }

    /// Whether a session has any transcript content yet.
    pub fn has_messages(&self, session_key: &str) -> bool {
        self.get(session_key).is_some_and(|e| e.message_count > 0)
    }

    pub fn set_title(&self, session_key: &str, title: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.title = Some(title.to_owned());
            entry.updated_at = Utc::now();
            self.flush_locked(&sessions);
        }
    }

    pub fn record_usage(&self, session_key: &str, input_tokens: u64, output_tokens: u64) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.updated_at = Utc::now();
            self.flush_locked(&sessions);
        }
    }

    // ── Transcripts ────────────────────────────────────────────────

    /// Append one message to a session's transcript.
    pub fn append_message(&self, session_key: &str, msg: &SessionMessage) -> Result<()> {
        let session_id = {
            let mut sessions = self.sessions.write();
            let entry = sessions
                .get_mut(session_key)
                .ok_or_else(|| Error::Other(format!("unknown session: {session_key}")))?;
            entry.message_count += 1;
            entry.updated_at = Utc::now();
            let id = entry.session_id.clone();
            self.flush_locked(&sessions);
            id
        };

        let path = self.transcripts_dir.join(format!("{session_id}.jsonl"));
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;
        Ok(())
    }

    /// Read a session's transcript, skipping malformed lines.
    pub fn messages(&self, session_key: &str) -> Vec<SessionMessage> {
        let Some(entry) = self.get(session_key) else {
            return Vec::new();
        };
        let path = self
            .transcripts_dir
            .join(format!("{}.jsonl", entry.session_id));
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionMessage>(line) {
                Ok(msg) => out.push(msg),
                Err(e) => {
                    tracing::warn!(session_key, error = %e, "skipping malformed transcript line");
                }
            }
        }
        out
    }

    /// The newest transcript messages whose combined content fits in
    /// `max_chars`, oldest first. A single oversized message is still
    /// returned alone rather than producing an empty window.
    pub fn recent_messages(&self, session_key: &str, max_chars: usize) -> Vec<SessionMessage> {
        let all = self.messages(session_key);
        let mut budget = 0usize;
        let mut start = all.len();
        for (i, msg) in all.iter().enumerate().rev() {
            budget += msg.content.len();
            if budget > max_chars && start < all.len() {
                break;
            }
            start = i;
            if budget > max_chars {
                break;
            }
        }
        all[start..].to_vec()
    }

    fn flush_locked(&self, sessions: &HashMap<String, SessionEntry>) {
        match serde_json::to_string_pretty(sessions) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.sessions_path, raw) {
                    tracing::warn!(error = %e, "failed to persist sessions.json");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize sessions.json"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
