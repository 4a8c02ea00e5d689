use indexmap::IndexMap;

use crate::media::ResolutionTier;

/// A generation model as the user picks it, plus the name the Flow backend
/// expects on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub wire_name: String,
    pub capabilities: Vec<String>,
    pub base_credits: u64,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name).or_else(|| {
            self.models
                .values()
                .find(|model| model.wire_name.eq_ignore_ascii_case(name.trim()))
        })
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

pub fn credit_cost(model: &ModelSpec, tier: ResolutionTier, count: u32) -> u64 {
    model
        .base_credits
        .saturating_mul(tier.credit_multiplier())
        .saturating_mul(u64::from(count))
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, wire_name: &str, capabilities: &[&str], base_credits: u64| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                wire_name: wire_name.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                base_credits,
            },
        );
    };

    insert("nano-banana-pro", "GEM_PIX_2", &["image", "upscale"], 2);
    insert("nano-banana", "GEM_PIX", &["image"], 1);
    insert("imagen-4", "IMAGEN_3_5", &["image"], 1);
    insert("veo-3-fast", "veo_3_1_t2v_fast", &["video"], 10);
    insert("veo-3-fast-i2v", "veo_3_1_i2v_s_fast", &["video", "video_from_image"], 10);

    map
}

#[cfg(test)]
mod tests {
    use super::{credit_cost, ModelRegistry};
    use crate::media::ResolutionTier;

    #[test]
    fn lookup_accepts_display_or_wire_name() {
        let registry = ModelRegistry::new(None);
        assert_eq!(
            registry.get("nano-banana-pro").map(|m| m.wire_name.as_str()),
            Some("GEM_PIX_2")
        );
        assert_eq!(
            registry.get("gem_pix_2").map(|m| m.name.as_str()),
            Some("nano-banana-pro")
        );
    }

    #[test]
    fn credit_cost_scales_with_tier_and_count() {
        let registry = ModelRegistry::new(None);
        let model = registry.get("nano-banana-pro").cloned().unwrap_or_else(|| {
            panic!("default registry missing nano-banana-pro");
        });
        assert_eq!(credit_cost(&model, ResolutionTier::Standard, 1), 2);
        assert_eq!(credit_cost(&model, ResolutionTier::TwoK, 3), 12);
        assert_eq!(credit_cost(&model, ResolutionTier::FourK, 2), 16);
    }
}
