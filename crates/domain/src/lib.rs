//! Shared domain types for the Nebo agent: configuration tree, error
//! taxonomy, chat message model, runner stream events, and request origins.

pub mod chat;
pub mod config;
pub mod error;
pub mod origin;
pub mod stream;

pub use error::{Error, Result};
