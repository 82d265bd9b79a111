//! YAML settings file.
//!
//! ```yaml
//! database: /var/lib/slpindex/slpindex.db
//! node:
//!   url: http://127.0.0.1:8332
//!   user: bitcoin
//!   password: secret
//! sync:
//!   network: testnet
//!   max_rollback: 50
//! log:
//!   level: info
//!   components:
//!     slpindex-core: debug
//! ```
//!
//! Every section is optional. Command-line flags and their environment
//! variables override the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use slpindex_core::SyncConfig;
use slpindex_rpc::NodeRpcConfig;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: String,
    pub node: NodeRpcConfig,
    pub sync: SyncConfig,
    pub log: LogConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: "slpindex.db".into(),
            node: NodeRpcConfig::default(),
            sync: SyncConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
            }
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}
