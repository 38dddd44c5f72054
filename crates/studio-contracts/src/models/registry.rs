use indexmap::IndexMap;

use super::tier::QualityTier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub tier: QualityTier,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Image models the studio knows how to call, in preference order.
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
        self.models.get(name)
    }

    pub fn by_tier(&self, tier: QualityTier) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.tier == tier && model.supports("edit"))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, tier: QualityTier) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.tier == tier && model.supports("edit") {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, tier: QualityTier, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                tier,
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(
        "gemini-2.5-flash-image",
        "gemini",
        QualityTier::Standard,
        &["edit"],
    );
    insert(
        "gemini-3-pro-image-preview",
        "gemini",
        QualityTier::High,
        &["edit"],
    );
    insert(
        "gemini-2.0-flash-preview-image-generation",
        "gemini",
        QualityTier::Standard,
        &["edit"],
    );
    insert(
        "dryrun-image-1",
        "dryrun",
        QualityTier::Standard,
        &["edit"],
    );
    insert(
        "dryrun-image-hd",
        "dryrun",
        QualityTier::High,
        &["edit"],
    );

    map
}
