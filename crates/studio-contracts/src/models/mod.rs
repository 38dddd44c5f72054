mod registry;
mod selectors;
mod tier;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
pub use tier::{ImageConfig, QualityTier};
