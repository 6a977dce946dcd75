//! Startup plumbing: data dir resolution, bot identity, the
//! single-instance lock, and platform sentinels.

pub mod bot_id;
pub mod data_dir;
pub mod lock;
pub mod sentinels;
