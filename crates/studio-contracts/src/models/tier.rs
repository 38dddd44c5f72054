use std::fmt;

use serde::{Deserialize, Serialize};

/// Output settings the service is asked for on the high tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageConfig {
    pub aspect_ratio: &'static str,
    pub image_size: &'static str,
}

pub const HIGH_TIER_IMAGE_CONFIG: ImageConfig = ImageConfig {
    aspect_ratio: "1:1",
    image_size: "1K",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Standard,
    High,
}

impl QualityTier {
    pub fn from_flag(use_high: bool) -> Self {
        if use_high {
            Self::High
        } else {
            Self::Standard
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::High => "high",
        }
    }

    pub fn image_config(self) -> Option<ImageConfig> {
        match self {
            Self::Standard => None,
            Self::High => Some(HIGH_TIER_IMAGE_CONFIG),
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
