use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration. Simulate mode and cascading are opt-in; everything
/// here is an explicit value handed to the session, never a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Short-circuits backend writes during commit while still exercising
    /// validation and cascade computation.
    pub simulate_writes: bool,
    pub enable_cascade: bool,
    pub language: String,
    pub schema_retry_attempts: u32,
    pub schema_retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simulate_writes: false,
            enable_cascade: false,
            language: "english".to_string(),
            schema_retry_attempts: 3,
            schema_retry_backoff_ms: 250,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("failed to parse engine config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn defaults_are_safe() {
        let config = EngineConfig::default();
        assert!(!config.simulate_writes);
        assert!(!config.enable_cascade);
        assert_eq!(config.language, "english");
        assert_eq!(config.schema_retry_attempts, 3);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = EngineConfig::from_yaml_str("simulate_writes: true\nlanguage: german\n")
            .expect("parse");
        assert!(config.simulate_writes);
        assert_eq!(config.language, "german");
        assert!(!config.enable_cascade);
        assert_eq!(config.schema_retry_backoff_ms, 250);
    }
}
