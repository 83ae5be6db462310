//! The fixed set of Groq-hosted models a user can pick from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub label: &'static str,
    /// Context window in tokens.
    pub context_window: u32,
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "llama3-8b-8192",
        label: "Llama 3 8B",
        context_window: 8192,
    },
    ModelInfo {
        id: "llama3-70b-8192",
        label: "Llama 3 70B",
        context_window: 8192,
    },
    ModelInfo {
        id: "mixtral-8x7b-32768",
        label: "Mixtral 8x7B",
        context_window: 32768,
    },
    ModelInfo {
        id: "gemma-7b-it",
        label: "Gemma 7B Instruct",
        context_window: 8192,
    },
    ModelInfo {
        id: "gemma2-9b-it",
        label: "Gemma 2 9B Instruct",
        context_window: 8192,
    },
    ModelInfo {
        id: "llama-3.3-70b-versatile",
        label: "Llama 3.3 70B Versatile",
        context_window: 131072,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown model '{0}'; expected one of: {ids}", ids = model_ids().join(", "))]
pub struct UnknownModel(pub String);

/// A model identifier that is guaranteed to be in [`MODELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(&'static ModelInfo);

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        self.0.id
    }

    pub fn info(&self) -> &'static ModelInfo {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ModelId> {
        MODELS.iter().map(ModelId)
    }
}

impl Default for ModelId {
    fn default() -> Self {
        ModelId(&MODELS[0])
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.id)
    }
}

impl FromStr for ModelId {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MODELS
            .iter()
            .find(|info| info.id == wanted)
            .map(ModelId)
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

impl TryFrom<String> for ModelId {
    type Error = UnknownModel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.as_str().to_string()
    }
}

pub fn model_ids() -> Vec<&'static str> {
    MODELS.iter().map(|info| info.id).collect()
}
