// Engine configuration, read from an optional TOML file. Every field has a default, so an
// empty file (or no file at all) describes the stock setup.

use crate::derived::RecommendationPolicy;
use crate::types::DEFAULT_LABEL_COLUMN;
use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SEPARATOR: char = '\t';

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("The column separator must be a single-byte character, got '{0}'.")]
    Separator(char),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the case/control column in the reference table.
    pub label_column: String,
    /// Field separator of the reference table.
    pub separator: char,
    /// Number of features in the attribution ranking.
    pub top_k: usize,
    pub recommendations: RecommendationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label_column: DEFAULT_LABEL_COLUMN.to_string(),
            separator: DEFAULT_SEPARATOR,
            top_k: DEFAULT_TOP_K,
            recommendations: RecommendationPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// The separator as the byte the CSV reader expects.
    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        u8::try_from(self.separator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or(ConfigError::Separator(self.separator))
    }
}
