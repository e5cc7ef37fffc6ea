use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_CLIENT_ID: &str = "kafka-admin";
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub kafka: KafkaConfig,
    pub tree_store: TreeStoreConfig,
}

/// Parameters for the cluster client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub seed_peers: Vec<String>,
    pub client_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            seed_peers: vec!["localhost:9092".to_string()],
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// Parameters for the tree store connection. `chroot` prefixes every path
/// the ownership scanner reads, e.g. `/kafka` makes groups live under
/// `/kafka/consumers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeStoreConfig {
    pub seed_peers: Vec<String>,
    pub chroot: String,
    pub session_timeout_ms: u64,
}

impl Default for TreeStoreConfig {
    fn default() -> Self {
        Self {
            seed_peers: vec!["localhost:2181".to_string()],
            chroot: String::new(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

impl AdminConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: AdminConfig = serde_json::from_str(json).context("failed to parse admin config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read admin config, path={}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.seed_peers.is_empty() {
            return Err(anyhow!("kafka.seed_peers must not be empty"));
        }
        if self.tree_store.seed_peers.is_empty() {
            return Err(anyhow!("tree_store.seed_peers must not be empty"));
        }
        let chroot = &self.tree_store.chroot;
        if !chroot.is_empty() && (!chroot.starts_with('/') || chroot.ends_with('/')) {
            return Err(anyhow!(
                "tree_store.chroot must start with '/' and must not end with '/', chroot={}",
                chroot
            ));
        }
        Ok(())
    }
}
