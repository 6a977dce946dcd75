//! Advisor deliberation.
//!
//! Advisors are short-lived personas consulted in parallel before the
//! main response. Each gets the user prompt plus its persona framing and
//! a hard per-advisor timeout; slow or failing advisors are dropped, and
//! the surviving notes join the system context.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use nebo_domain::chat::Message;
use nebo_domain::config::AdvisorConfig;
use nebo_providers::{ChatRequest, LlmProvider};

/// Hard ceiling on advisors regardless of configuration.
pub const MAX_ADVISORS: usize = 5;

/// One deliberation persona.
#[derive(Debug, Clone)]
pub struct Advisor {
    pub name: String,
    /// Persona framing prepended as the advisor's system prompt.
    pub persona: String,
}

/// Consult advisors in parallel. Returns `(name, note)` pairs in advisor
/// order, skipping timeouts and failures.
pub async fn deliberate(
    provider: Arc<dyn LlmProvider>,
    advisors: &[Advisor],
    prompt: &str,
    config: &AdvisorConfig,
) -> Vec<(String, String)> {
    if !config.enabled || advisors.is_empty() {
        return Vec::new();
    }

    let limit = config.max_advisors.min(MAX_ADVISORS);
    let timeout = Duration::from_secs(config.timeout_secs);

    let futures: Vec<_> = advisors
        .iter()
        .take(limit)
        .map(|advisor| {
            let provider = provider.clone();
            let name = advisor.name.clone();
            let persona = advisor.persona.clone();
            let prompt = prompt.to_owned();
            async move {
                let req = ChatRequest {
                    messages: vec![Message::system(&persona), Message::user(&prompt)],
                    ..Default::default()
                };
                match tokio::time::timeout(timeout, provider.chat_text(req)).await {
                    Ok(Ok(note)) if !note.trim().is_empty() => Some((name, note)),
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => {
                        tracing::warn!(advisor = %name, error = %e, "advisor failed; skipping");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(advisor = %name, "advisor timed out; skipping");
                        None
                    }
                }
            }
        })
        .collect();

    join_all(futures).await.into_iter().flatten().collect()
}
