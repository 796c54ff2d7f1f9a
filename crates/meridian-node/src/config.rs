//! Configuration types for meridian-node.
//! Parsed from ~/.meridian/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub dynamics: DynamicsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_database")]
    pub database: String,
    /// EnvFilter directives; `RUST_LOG` takes precedence when set.
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DynamicsSection {
    /// Cursor to move to right after a first-run bootstrap. Ignored once the
    /// timeline exists.
    pub bootstrap_current_epoch: Option<u32>,
}

fn default_database() -> String {
    "~/.meridian/dynamics.db".into()
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            if config.dynamics.bootstrap_current_epoch == Some(0) {
                anyhow::bail!("dynamics.bootstrap_current_epoch must be non-zero");
            }
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection {
                database: default_database(),
                log_filter: None,
            },
            dynamics: DynamicsSection::default(),
        }
    }
}
