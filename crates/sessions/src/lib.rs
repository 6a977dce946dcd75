//! Session and recovery persistence for the Nebo agent.
//!
//! The agent shares a storage directory with the local server; this crate
//! is the typed facade over it: session records with append-only JSONL
//! transcripts, and durable recovered-task records that survive restarts.

pub mod meta;
pub mod recovery;
pub mod store;

pub use meta::MetaStore;
pub use recovery::{RecoveryStore, TaskRecord, TaskState, TaskType};
pub use store::{SessionEntry, SessionManager, SessionMessage};
