//! Supported model tiers and their static context budgets.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model identifier that is not in the supported tier table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported model: {0}")]
pub struct UnsupportedModelError(pub String);

/// Multimodal model tier a job runs against.
///
/// Each tier has a fixed context window. Durations are derived from it at
/// roughly 300 tokens per second of video (frames at 1 fps plus audio),
/// leaving room for the prompt and the structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ModelTier {
    #[serde(rename = "gemini-1.5-pro")]
    Gemini15Pro,
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
    #[serde(rename = "gemini-2.5-flash-lite")]
    Gemini25FlashLite,
    #[serde(rename = "gemini-2.5-flash")]
    Gemini25Flash,
    #[serde(rename = "gemini-2.5-pro")]
    Gemini25Pro,
}

impl ModelTier {
    /// All supported tiers.
    pub const ALL: [ModelTier; 5] = [
        ModelTier::Gemini15Pro,
        ModelTier::Gemini20Flash,
        ModelTier::Gemini25FlashLite,
        ModelTier::Gemini25Flash,
        ModelTier::Gemini25Pro,
    ];

    /// API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Gemini15Pro => "gemini-1.5-pro",
            ModelTier::Gemini20Flash => "gemini-2.0-flash",
            ModelTier::Gemini25FlashLite => "gemini-2.5-flash-lite",
            ModelTier::Gemini25Flash => "gemini-2.5-flash",
            ModelTier::Gemini25Pro => "gemini-2.5-pro",
        }
    }

    /// Context window size in tokens.
    pub fn context_tokens(&self) -> u64 {
        match self {
            ModelTier::Gemini15Pro => 2_097_152,
            ModelTier::Gemini20Flash
            | ModelTier::Gemini25FlashLite
            | ModelTier::Gemini25Flash
            | ModelTier::Gemini25Pro => 1_048_576,
        }
    }

    /// Hard maximum of video seconds accepted in one call.
    pub fn max_duration_seconds(&self) -> u32 {
        match self {
            ModelTier::Gemini15Pro => 5400,
            ModelTier::Gemini20Flash => 2700,
            ModelTier::Gemini25FlashLite => 2700,
            ModelTier::Gemini25Flash => 2700,
            ModelTier::Gemini25Pro => 2700,
        }
    }

    /// Recommended chunk length, about 83% of the hard maximum.
    pub fn chunk_duration_seconds(&self) -> u32 {
        match self {
            ModelTier::Gemini15Pro => 4500,
            ModelTier::Gemini20Flash
            | ModelTier::Gemini25FlashLite
            | ModelTier::Gemini25Flash
            | ModelTier::Gemini25Pro => 2250,
        }
    }

    /// Output token cap requested on every call.
    pub fn max_output_tokens(&self) -> u32 {
        match self {
            ModelTier::Gemini15Pro | ModelTier::Gemini20Flash => 8192,
            ModelTier::Gemini25FlashLite | ModelTier::Gemini25Flash | ModelTier::Gemini25Pro => {
                65_536
            }
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = UnsupportedModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let wanted = wanted.strip_prefix("models/").unwrap_or(wanted.as_str());
        ModelTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == wanted)
            .ok_or_else(|| UnsupportedModelError(s.to_string()))
    }
}
