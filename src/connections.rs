use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{error, info};
use tokio::sync::Mutex;

use crate::config::{AdminConfig, KafkaConfig, TreeStoreConfig};
use crate::error::{Error, Result};
use crate::kafka::Cluster;
use crate::tree::TreeStore;

/// Creates the connections the admin needs. Implementations own transport
/// details such as addresses, timeouts and framing.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_cluster(&self, cfg: &KafkaConfig) -> anyhow::Result<Arc<dyn Cluster>>;

    async fn connect_tree_store(&self, cfg: &TreeStoreConfig) -> anyhow::Result<Arc<dyn TreeStore>>;
}

#[derive(Default)]
struct Connections {
    cluster: Option<Arc<dyn Cluster>>,
    tree_store: Option<Arc<dyn TreeStore>>,
    closed: bool,
}

/// Lazily created cluster and tree store connections.
///
/// Each connection is created on first use and shared afterwards; the lock
/// only guards creation, callers use the returned handles without it. A
/// failed attempt leaves the slot empty so the next call tries again.
pub struct ConnectionManager {
    cfg: AdminConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<Connections>,
}

impl ConnectionManager {
    pub fn new(cfg: AdminConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            cfg,
            connector,
            state: Mutex::new(Connections::default()),
        }
    }

    pub fn config(&self) -> &AdminConfig {
        &self.cfg
    }

    pub async fn acquire_cluster(&self) -> Result<Arc<dyn Cluster>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::connection("failed to create cluster client", anyhow!("admin is closed")));
        }
        if let Some(cluster) = &state.cluster {
            return Ok(cluster.clone());
        }
        let cluster = self
            .connector
            .connect_cluster(&self.cfg.kafka)
            .await
            .map_err(|e| {
                error!("Failed to create cluster client: {:#}", e);
                Error::connection("failed to create cluster client", e)
            })?;
        info!("Connected to Kafka cluster: seed_peers={:?}", self.cfg.kafka.seed_peers);
        state.cluster = Some(cluster.clone());
        Ok(cluster)
    }

    pub async fn acquire_tree_store(&self) -> Result<Arc<dyn TreeStore>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::connection("failed to create tree store connection", anyhow!("admin is closed")));
        }
        if let Some(tree_store) = &state.tree_store {
            return Ok(tree_store.clone());
        }
        let tree_store = self
            .connector
            .connect_tree_store(&self.cfg.tree_store)
            .await
            .map_err(|e| {
                error!("Failed to create tree store connection: {:#}", e);
                Error::connection("failed to create tree store connection", e)
            })?;
        info!("Connected to tree store: seed_peers={:?}", self.cfg.tree_store.seed_peers);
        state.tree_store = Some(tree_store.clone());
        Ok(tree_store)
    }

    /// Releases whatever connections were created. Calling it again is a no-op.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(cluster) = state.cluster.take() {
            cluster.close().await;
        }
        if let Some(tree_store) = state.tree_store.take() {
            tree_store.close().await;
        }
        info!("Admin connections closed");
    }
}
