//! Provider abstraction for the Nebo runner.
//!
//! Concrete LLM adapters live outside the core; this crate defines the
//! contract they implement ([`LlmProvider`]), the registry that holds and
//! routes them, the per-profile usage/error tracker with cooldown backoff,
//! and a deterministic scripted provider for tests.

pub mod profile;
pub mod registry;
pub mod scripted;
pub mod traits;

pub use profile::{ErrorKind, ProfileTracker};
pub use registry::ProviderRegistry;
pub use scripted::ScriptedProvider;
pub use traits::{ChatRequest, LlmProvider};
