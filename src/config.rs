//! Node configuration.
//!
//! Loads an optional `obscura.toml` from the data directory. CLI flags
//! override config file values; defaults apply when neither is given.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObscuraConfig {
    pub node: NodeSection,
}

/// `[node]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: String,
    pub genesis_file: String,
    /// Path to the validator key file; empty means this node observes only.
    pub validator_key: String,
    pub block_time_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        NodeSection {
            data_dir: "./obscura-data".into(),
            genesis_file: "genesis.json".into(),
            validator_key: String::new(),
            block_time_ms: crate::constants::BLOCK_TIME_MS,
        }
    }
}

impl ObscuraConfig {
    /// Load configuration from `obscura.toml` in the given directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("obscura.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn validator_key_path(&self) -> Option<PathBuf> {
        if self.node.validator_key.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.node.validator_key))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = ObscuraConfig::default();
        assert_eq!(config.node.block_time_ms, crate::constants::BLOCK_TIME_MS);
        assert_eq!(config.node.genesis_file, "genesis.json");
        assert!(config.validator_key_path().is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[node]
data_dir = "/var/lib/obscura"
validator_key = "validator.json"
block_time_ms = 500
"#;
        let config: ObscuraConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.data_dir, "/var/lib/obscura");
        assert_eq!(config.node.block_time_ms, 500);
        assert_eq!(
            config.validator_key_path().unwrap(),
            PathBuf::from("validator.json")
        );
        // Unspecified fields fall back to defaults.
        assert_eq!(config.node.genesis_file, "genesis.json");
    }

    #[test]
    fn missing_config_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = ObscuraConfig::load(dir.path());
        assert_eq!(config.node.block_time_ms, crate::constants::BLOCK_TIME_MS);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("obscura.toml"),
            "[node]\nblock_time_ms = 250\n",
        )
        .unwrap();
        let config = ObscuraConfig::load(dir.path());
        assert_eq!(config.node.block_time_ms, 250);
    }
}
