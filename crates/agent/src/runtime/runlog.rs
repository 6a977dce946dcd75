//! Run tracking — the per-run state machine and a bounded in-memory log.
//!
//! States: Admitted → Streaming → Finalizing → Done/Cancelled/Failed.
//! Admission writes a lane event, the first provider event enters
//! Streaming, the provider closing its stream enters Finalizing, and the
//! terminal `res` frame lands the run in a terminal state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

const MAX_RUNS_IN_MEMORY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Admitted,
    Streaming,
    Finalizing,
    Done,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Legal transitions only move forward through the machine.
    fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match self {
            Admitted => matches!(next, Streaming | Finalizing | Done | Cancelled | Failed),
            Streaming => matches!(next, Finalizing | Done | Cancelled | Failed),
            Finalizing => matches!(next, Done | Cancelled | Failed),
            Done | Cancelled | Failed => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub run_id: Uuid,
    pub session_key: String,
    pub lane: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub loop_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded ring of recent runs with an id index.
pub struct RunLog {
    inner: RwLock<RunLogInner>,
}

struct RunLogInner {
    runs: VecDeque<RunEntry>,
    index: HashMap<Uuid, usize>,
    base_seq: usize,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RunLogInner {
                runs: VecDeque::new(),
                index: HashMap::new(),
                base_seq: 0,
            }),
        }
    }

    /// Admit a new run and return its id.
    pub fn admit(&self, session_key: &str, lane: &str) -> Uuid {
        let run_id = Uuid::new_v4();
        let entry = RunEntry {
            run_id,
            session_key: session_key.to_owned(),
            lane: lane.to_owned(),
            state: RunState::Admitted,
            started_at: Utc::now(),
            ended_at: None,
            loop_count: 0,
            error: None,
        };

        let mut inner = self.inner.write();
        if inner.runs.len() >= MAX_RUNS_IN_MEMORY {
            if let Some(old) = inner.runs.pop_front() {
                inner.index.remove(&old.run_id);
                inner.base_seq += 1;
            }
        }
        let seq = inner.base_seq + inner.runs.len();
        inner.index.insert(run_id, seq);
        inner.runs.push_back(entry);
        run_id
    }

    /// Advance a run's state. Illegal transitions (e.g. out of a terminal
    /// state) are ignored with a debug log, which makes cancellation
    /// races harmless.
    pub fn advance(&self, run_id: &Uuid, next: RunState) {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(run_id) else {
            return;
        };
        if !entry.state.can_advance_to(next) {
            tracing::debug!(
                %run_id,
                from = ?entry.state,
                to = ?next,
                "ignoring illegal run transition"
            );
            return;
        }
        entry.state = next;
        if next.is_terminal() {
            entry.ended_at = Some(Utc::now());
        }
    }

    pub fn fail(&self, run_id: &Uuid, error: &str) {
        {
            let mut inner = self.inner.write();
            if let Some(entry) = inner.get_mut(run_id) {
                if entry.error.is_none() {
                    entry.error = Some(error.to_owned());
                }
            }
        }
        self.advance(run_id, RunState::Failed);
    }

    pub fn bump_loop(&self, run_id: &Uuid) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.get_mut(run_id) {
            entry.loop_count += 1;
        }
    }

    pub fn get(&self, run_id: &Uuid) -> Option<RunEntry> {
        let inner = self.inner.read();
        let seq = *inner.index.get(run_id)?;
        inner.runs.get(seq - inner.base_seq).cloned()
    }
}

impl RunLogInner {
    fn get_mut(&mut self, run_id: &Uuid) -> Option<&mut RunEntry> {
        let seq = *self.index.get(run_id)?;
        let idx = seq - self.base_seq;
        self.runs.get_mut(idx)
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}
