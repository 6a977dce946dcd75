//! Nebo agent execution core.
//!
//! The agent process takes heterogeneous work (chat turns, scheduled
//! jobs, inter-agent messages, recovered tasks, voice) and dispatches it
//! through concurrency-bounded lanes to a streaming runner, with a
//! WebSocket control channel back to the local server.

pub mod boot;
pub mod cli;
pub mod comm;
pub mod control;
pub mod lanes;
pub mod recovery;
pub mod runtime;
pub mod state;
pub mod voice;
