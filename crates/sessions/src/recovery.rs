//! Durable recovered-task records.
//!
//! Every long-running background task is written here before execution so
//! a process restart can resume it. Records append to `recovery.jsonl`;
//! each append is a full snapshot, and loading keeps the last snapshot per
//! id. Eviction rewrites the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nebo_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What kind of work the record represents; implies the recovery lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// A scheduled job or reminder run.
    Event,
    /// An orchestrated sub-task.
    Subagent,
    /// Anything else; recovered onto Main.
    Chat,
}

/// One durable task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub task_type: TaskType,
    pub session_key: String,
    pub user_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub description: String,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(
        task_type: TaskType,
        session_key: &str,
        user_id: &str,
        prompt: &str,
        description: &str,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type,
            session_key: session_key.to_owned(),
            user_id: user_id.to_owned(),
            prompt: prompt.to_owned(),
            system: None,
            description: description.to_owned(),
            state: TaskState::Pending,
            attempts: 0,
            max_attempts,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSONL-backed store of task records, indexed in memory.
pub struct RecoveryStore {
    inner: Mutex<HashMap<Uuid, TaskRecord>>,
    log_path: PathBuf,
}

impl RecoveryStore {
    /// Load the store from `data_dir/recovery.jsonl`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(Error::Io)?;
        let log_path = data_dir.join("recovery.jsonl");

        let mut records: HashMap<Uuid, TaskRecord> = HashMap::new();
        if log_path.exists() {
            let raw = std::fs::read_to_string(&log_path).map_err(Error::Io)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TaskRecord>(line) {
                    // Last snapshot per id wins.
                    Ok(rec) => {
                        records.insert(rec.id, rec);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed recovery record");
                    }
                }
            }
        }

        tracing::info!(
            records = records.len(),
            path = %log_path.display(),
            "recovery store loaded"
        );

        Ok(Self {
            inner: Mutex::new(records),
            log_path,
        })
    }

    /// Persist a new record in state `pending`.
    pub fn create(&self, record: TaskRecord) -> Result<Uuid> {
        let id = record.id;
        let mut inner = self.inner.lock();
        self.append_locked(&record)?;
        inner.insert(id, record);
        Ok(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<TaskRecord> {
        self.inner.lock().get(id).cloned()
    }

    pub fn mark_running(&self, id: &Uuid) -> Result<()> {
        self.transition(id, |rec| {
            rec.state = TaskState::Running;
        })
    }

    pub fn mark_completed(&self, id: &Uuid) -> Result<()> {
        self.transition(id, |rec| {
            rec.state = TaskState::Completed;
        })
    }

    pub fn mark_failed(&self, id: &Uuid, reason: &str) -> Result<()> {
        self.transition(id, |rec| {
            rec.state = TaskState::Failed;
            rec.error = Some(reason.to_owned());
        })
    }

    /// Increment the attempt counter and return the new value. Also resets
    /// a `running` record to `pending`: a record still marked running at
    /// scan time belongs to a process that died mid-flight.
    pub fn claim_for_recovery(&self, id: &Uuid) -> Result<u32> {
        let mut attempts = 0;
        self.transition(id, |rec| {
            rec.attempts += 1;
            attempts = rec.attempts;
            if rec.state == TaskState::Running {
                rec.state = TaskState::Pending;
            }
        })?;
        Ok(attempts)
    }

    /// All records in state `pending` or `running`, oldest first.
    pub fn incomplete(&self) -> Vec<TaskRecord> {
        let inner = self.inner.lock();
        let mut out: Vec<TaskRecord> = inner
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// Drop terminal records older than the retention window. Returns the
    /// number evicted. Rewrites the JSONL file.
    pub fn evict_terminal(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, r| !r.state.is_terminal() || r.updated_at > cutoff);
        let evicted = before - inner.len();
        if evicted > 0 {
            self.rewrite_locked(&inner);
        }
        evicted
    }

    fn transition<F: FnOnce(&mut TaskRecord)>(&self, id: &Uuid, f: F) -> Result<()> {
        let mut inner = self.inner.lock();
        let rec = inner
            .get_mut(id)
            .ok_or_else(|| Error::Other(format!("unknown task record: {id}")))?;
        f(rec);
        rec.updated_at = Utc::now();
        let snapshot = rec.clone();
        self.append_locked(&snapshot)
    }

    fn append_locked(&self, record: &TaskRecord) -> Result<()> {
        use std::io::Write;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;
        Ok(())
    }

    fn rewrite_locked(&self, records: &HashMap<Uuid, TaskRecord>) {
        let mut buf = String::new();
        for rec in records.values() {
            if let Ok(json) = serde_json::to_string(rec) {
                buf.push_str(&json);
                buf.push('\n');
            }
        }
        if let Err(e) = std::fs::write(&self.log_path, buf) {
            tracing::warn!(error = %e, "failed to rewrite recovery.jsonl");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, RecoveryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn make_record(task_type: TaskType) -> TaskRecord {
        TaskRecord::new(task_type, "sk", "owner", "do the thing", "nightly digest", 3)
    }

    #[test]
    fn create_and_get() {
        let (_dir, store) = make_store();
        let id = store.create(make_record(TaskType::Event)).unwrap();
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.state, TaskState::Pending);
        assert_eq!(rec.attempts, 0);
    }

    #[test]
    fn lifecycle_transitions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = RecoveryStore::new(dir.path()).unwrap();
            let id = store.create(make_record(TaskType::Event)).unwrap();
            store.mark_running(&id).unwrap();
            store.mark_completed(&id).unwrap();
            id
        };

        // Reload: the last snapshot per id wins.
        let store = RecoveryStore::new(dir.path()).unwrap();
        assert_eq!(store.get(&id).unwrap().state, TaskState::Completed);
    }

    #[test]
    fn running_record_survives_restart_as_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = RecoveryStore::new(dir.path()).unwrap();
            let id = store.create(make_record(TaskType::Subagent)).unwrap();
            store.mark_running(&id).unwrap();
            id
            // Process "dies" here with the record still running.
        };

        let store = RecoveryStore::new(dir.path()).unwrap();
        let incomplete = store.incomplete();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, id);
        assert_eq!(incomplete[0].state, TaskState::Running);
    }

    #[test]
    fn claim_resets_running_to_pending_and_counts() {
        let (_dir, store) = make_store();
        let id = store.create(make_record(TaskType::Event)).unwrap();
        store.mark_running(&id).unwrap();

        assert_eq!(store.claim_for_recovery(&id).unwrap(), 1);
        assert_eq!(store.get(&id).unwrap().state, TaskState::Pending);

        // One increment per scan per task: a second scan adds exactly one.
        assert_eq!(store.claim_for_recovery(&id).unwrap(), 2);
    }

    #[test]
    fn incomplete_excludes_terminal() {
        let (_dir, store) = make_store();
        let a = store.create(make_record(TaskType::Event)).unwrap();
        let b = store.create(make_record(TaskType::Chat)).unwrap();
        store.mark_failed(&a, "boom").unwrap();

        let incomplete = store.incomplete();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, b);
    }

    #[test]
    fn mark_failed_records_reason() {
        let (_dir, store) = make_store();
        let id = store.create(make_record(TaskType::Event)).unwrap();
        store.mark_failed(&id, "exceeded max attempts").unwrap();
        let rec = store.get(&id).unwrap();
        assert_eq!(rec.state, TaskState::Failed);
        assert_eq!(rec.error.as_deref(), Some("exceeded max attempts"));
    }

    #[test]
    fn evict_terminal_respects_retention() {
        let (_dir, store) = make_store();
        let done = store.create(make_record(TaskType::Event)).unwrap();
        let live = store.create(make_record(TaskType::Event)).unwrap();
        store.mark_completed(&done).unwrap();

        // Nothing is old enough yet.
        assert_eq!(store.evict_terminal(Duration::hours(1)), 0);

        // With a zero-width window the completed record goes; the pending
        // one stays regardless of age.
        assert_eq!(store.evict_terminal(Duration::zero()), 1);
        assert!(store.get(&done).is_none());
        assert!(store.get(&live).is_some());
    }

    #[test]
    fn unknown_id_transition_errors() {
        let (_dir, store) = make_store();
        assert!(store.mark_running(&Uuid::new_v4()).is_err());
    }
}
