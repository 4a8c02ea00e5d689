use crate::media::ResolutionTier;

use super::registry::{ModelRegistry, ModelSpec};

/// Capability a model needs on top of the base one when the order asks for
/// a 2K/4K result.
pub const UPSCALE_CAPABILITY: &str = "upscale";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Picks the requested model when it can serve `capability` at `tier`,
    /// otherwise the first registry entry that can, with the reason recorded.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
        tier: ResolutionTier,
    ) -> Result<ModelSelection, String> {
        let requested = requested
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let fits = |model: &ModelSpec| {
            model.supports(capability)
                && (!tier.requires_upscale() || model.supports(UPSCALE_CAPABILITY))
        };

        let fallback_reason = match requested.as_deref() {
            None => "No model specified; using default.".to_string(),
            Some(name) => match self.registry.get(name) {
                Some(model) if fits(model) => {
                    return Ok(ModelSelection {
                        model: model.clone(),
                        requested: requested.clone(),
                        fallback_reason: None,
                    });
                }
                Some(model) if model.supports(capability) => format!(
                    "Model '{}' cannot produce {} output.",
                    model.name,
                    tier.label()
                ),
                Some(model) => format!(
                    "Model '{}' does not support '{capability}'.",
                    model.name
                ),
                None => format!("Unknown model '{name}'."),
            },
        };

        let model = self
            .registry
            .list()
            .find(|model| fits(*model))
            .cloned()
            .ok_or_else(|| {
                format!(
                    "No model supports '{capability}' at {} resolution.",
                    tier.label()
                )
            })?;
        Ok(ModelSelection {
            model,
            requested,
            fallback_reason: Some(fallback_reason),
        })
    }
}
