//! Provider registry.
//!
//! Holds all configured provider instances and resolves which one serves a
//! request. Resolution order: explicit request override, then the lane's
//! routing model, then the default provider.

use std::collections::HashMap;
use std::sync::Arc;

use nebo_domain::error::{Error, Result};

use crate::traits::LlmProvider;

/// Holds instantiated providers keyed by id.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_id: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_id: None,
        }
    }

    /// Register a provider. The first registration becomes the default.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_owned();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn default_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.default_id.as_ref().and_then(|id| self.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a provider and optional model name for a request.
    ///
    /// Overrides are `"provider/model"` spec strings; a bare `"provider"`
    /// selects that provider's default model. `request_override` (from the
    /// run request) wins over `lane_model` (from lane routing config).
    pub fn resolve(
        &self,
        request_override: Option<&str>,
        lane_model: Option<&str>,
    ) -> Result<(Arc<dyn LlmProvider>, Option<String>)> {
        for spec in [request_override, lane_model].into_iter().flatten() {
            let provider_id = spec.split('/').next().unwrap_or(spec);
            if let Some(p) = self.get(provider_id) {
                let model = spec.split_once('/').map(|(_, m)| m.to_owned());
                return Ok((p, model));
            }
            tracing::warn!(spec, "model override names an unknown provider; falling through");
        }

        self.default_provider()
            .map(|p| (p, None))
            .ok_or_else(|| {
                Error::Config(
                    "no LLM providers available. Configure at least one provider \
                     before running the agent."
                        .into(),
                )
            })
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
