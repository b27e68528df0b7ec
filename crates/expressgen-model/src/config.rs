//! Model construction settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Type-parameter name given to `GENERIC` types.
    pub generic_placeholder: String,
    /// Select alternatives that name non-model literals; renderers special-case them.
    pub opaque_select_alternatives: Vec<String>,
    /// Fail the build on names that are referenced but never declared.
    pub strict_references: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            generic_placeholder: "T".to_string(),
            opaque_select_alternatives: vec!["IfcNullStyle".to_string()],
            strict_references: false,
        }
    }
}

impl ModelConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn is_opaque_alternative(&self, name: &str) -> bool {
        self.opaque_select_alternatives.iter().any(|n| n == name)
    }
}
