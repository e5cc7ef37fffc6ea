use std::sync::Arc;

use log::debug;

use crate::config::AdminConfig;
use crate::connections::{ConnectionManager, Connector};
use crate::error::Result;
use crate::kafka::{coordinator, offsets, PartitionOffset};
use crate::tree::{owners, ClusterOwnershipMap, OwnershipMap};

/// Administrative operations on a Kafka cluster.
pub struct Admin {
    connections: ConnectionManager,
}

impl Admin {
    pub fn new(cfg: AdminConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connections: ConnectionManager::new(cfg, connector),
        }
    }

    fn chroot(&self) -> &str {
        &self.connections.config().tree_store.chroot
    }

    /// For every partition of `topic` returns the current offset range along
    /// with the latest offset and metadata committed by `group`.
    ///
    /// A topic without partitions yields an empty list without contacting
    /// the group coordinator, so an unreachable coordinator goes unnoticed.
    pub async fn get_group_offsets(&self, group: &str, topic: &str) -> Result<Vec<PartitionOffset>> {
        let cluster = self.connections.acquire_cluster().await?;
        let mut offsets = offsets::fetch_range(cluster.as_ref(), topic).await?;
        if offsets.is_empty() {
            return Ok(offsets);
        }

        let partitions: Vec<i32> = offsets.iter().map(|po| po.partition).collect();
        let committed =
            coordinator::fetch_committed(cluster.as_ref(), group, topic, &partitions).await?;
        for (po, committed) in offsets.iter_mut().zip(committed) {
            po.offset = committed.offset;
            po.metadata = committed.metadata;
        }
        debug!(
            "Fetched group offsets: group={}, topic={}, partitions={}",
            group,
            topic,
            offsets.len()
        );
        Ok(offsets)
    }

    /// Commits offsets and metadata for a list of partitions of `topic` on
    /// behalf of `group`. Only `partition`, `offset` and `metadata` of each
    /// record are used.
    pub async fn set_group_offsets(
        &self,
        group: &str,
        topic: &str,
        offsets: &[PartitionOffset],
    ) -> Result<()> {
        let cluster = self.connections.acquire_cluster().await?;
        coordinator::commit(cluster.as_ref(), group, topic, offsets).await
    }

    /// Returns client id -> consumed partitions for the clients of `group`
    /// consuming `topic`.
    pub async fn get_topic_consumers(&self, group: &str, topic: &str) -> Result<OwnershipMap> {
        let store = self.connections.acquire_tree_store().await?;
        owners::scan_group_topic(store.as_ref(), self.chroot(), group, topic).await
    }

    /// Returns group id -> client id -> consumed partitions for `topic`.
    /// Scans every consumer group registered in the tree store.
    pub async fn get_all_topic_consumers(&self, topic: &str) -> Result<ClusterOwnershipMap> {
        let store = self.connections.acquire_tree_store().await?;
        owners::scan_all_groups(store.as_ref(), self.chroot(), topic).await
    }

    pub async fn close(&self) {
        self.connections.close().await;
    }
}
