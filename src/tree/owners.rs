use log::{debug, info};

use super::{groups_path, owners_path, ClusterOwnershipMap, OwnershipMap, TreeError, TreeStore};
use crate::error::{Error, Result};

/// A node missing under a live session means the tree does not have the
/// expected shape; anything else is a store failure.
fn store_error(context: impl std::fmt::Display, err: TreeError) -> Error {
    match err {
        TreeError::NoNode => Error::protocol(format!("{}: {}", context, TreeError::NoNode)),
        TreeError::Other(cause) => Error::connection(context, cause),
    }
}

/// Returns which client of `group` owns each partition of `topic`.
///
/// Fails with a `NotFound` error if the group is not subscribed to the topic
/// (or either of them does not exist).
pub async fn scan_group_topic(
    store: &dyn TreeStore,
    chroot: &str,
    group: &str,
    topic: &str,
) -> Result<OwnershipMap> {
    let consumed_partitions_path = owners_path(chroot, group, topic);
    let partition_nodes = match store.children(&consumed_partitions_path).await {
        Ok(nodes) => nodes,
        Err(TreeError::NoNode) => {
            return Err(Error::not_found("either group or topic is incorrect"));
        }
        Err(e) => return Err(store_error("failed to fetch partition owners data", e)),
    };

    let mut consumers = OwnershipMap::new();
    for partition_node in partition_nodes {
        let partition: i32 = partition_node
            .parse()
            .map_err(|_| Error::protocol(format!("invalid partition id, {}", partition_node)))?;
        let partition_path = format!("{}/{}", consumed_partitions_path, partition_node);
        let data = store
            .get(&partition_path)
            .await
            .map_err(|e| store_error(format!("failed to fetch partition owner, partition={}", partition), e))?;
        let client_id = String::from_utf8_lossy(&data).into_owned();
        consumers.entry(client_id).or_default().push(partition);
    }

    for partitions in consumers.values_mut() {
        partitions.sort_unstable();
        partitions.dedup();
    }
    debug!(
        "Scanned partition owners: group={}, topic={}, clients={}",
        group,
        topic,
        consumers.len()
    );
    Ok(consumers)
}

/// Returns the ownership map of `topic` for every registered group that
/// consumes it. Scans all groups, so it can take a while on large clusters.
pub async fn scan_all_groups(
    store: &dyn TreeStore,
    chroot: &str,
    topic: &str,
) -> Result<ClusterOwnershipMap> {
    let groups = store
        .children(&groups_path(chroot))
        .await
        .map_err(|e| store_error("failed to fetch consumer groups", e))?;

    let mut consumers = ClusterOwnershipMap::new();
    for group in &groups {
        let group_consumers = match scan_group_topic(store, chroot, group, topic).await {
            Ok(group_consumers) => group_consumers,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.context(format!("failed to fetch group `{}` data", group))),
        };
        if !group_consumers.is_empty() {
            consumers.insert(group.clone(), group_consumers);
        }
    }
    info!(
        "Scanned topic consumers: topic={}, groups scanned={}, consuming={}",
        topic,
        groups.len(),
        consumers.len()
    );
    Ok(consumers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryTreeStore;

    const CHROOT: &str = "/kafka";

    fn store() -> MemoryTreeStore {
        let store = MemoryTreeStore::new();
        store.set_owner(CHROOT, "g1", "orders", "2", "clientB");
        store.set_owner(CHROOT, "g1", "orders", "1", "clientA");
        store.set_owner(CHROOT, "g1", "orders", "0", "clientA");
        store
    }

    #[tokio::test]
    async fn test_scan_group_topic() {
        let store = store();
        let consumers = scan_group_topic(&store, CHROOT, "g1", "orders").await.unwrap();
        let expected = OwnershipMap::from([
            ("clientA".to_string(), vec![0, 1]),
            ("clientB".to_string(), vec![2]),
        ]);
        assert_eq!(consumers, expected);
    }

    #[tokio::test]
    async fn test_partitions_sorted_numerically() {
        let store = MemoryTreeStore::new();
        for partition in ["10", "2", "9", "1"] {
            store.set_owner("", "g1", "orders", partition, "clientA");
        }
        let consumers = scan_group_topic(&store, "", "g1", "orders").await.unwrap();
        assert_eq!(consumers["clientA"], vec![1, 2, 9, 10]);
    }

    #[tokio::test]
    async fn test_unknown_group_or_topic_is_not_found() {
        let store = store();
        for (group, topic) in [("g2", "orders"), ("g1", "payments")] {
            let err = scan_group_topic(&store, CHROOT, group, topic).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
            assert_eq!(err.to_string(), "either group or topic is incorrect");
        }
    }

    #[tokio::test]
    async fn test_invalid_partition_id() {
        let store = store();
        store.set_owner(CHROOT, "g1", "orders", "three", "clientC");
        let err = scan_group_topic(&store, CHROOT, "g1", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "invalid partition id, three");
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let store = store();
        store.fail_path(&owners_path(CHROOT, "g1", "orders"), "session expired");
        let err = scan_group_topic(&store, CHROOT, "g1", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().starts_with("failed to fetch partition owners data: "));
    }

    #[tokio::test]
    async fn test_scan_all_groups() {
        let store = store();
        store.set_owner(CHROOT, "g2", "orders", "1", "clientX");
        store.set_owner(CHROOT, "g3", "payments", "0", "clientY");
        // Subscribed, but no partition is currently owned.
        store.create(&owners_path(CHROOT, "g4", "orders"), bytes::Bytes::new());
        store.register_group(CHROOT, "g5");

        let consumers = scan_all_groups(&store, CHROOT, "orders").await.unwrap();
        let mut groups: Vec<&str> = consumers.keys().map(String::as_str).collect();
        groups.sort();
        assert_eq!(groups, vec!["g1", "g2"]);
        assert_eq!(consumers["g2"], OwnershipMap::from([("clientX".to_string(), vec![1])]));
        assert!(consumers.values().all(|owners| !owners.is_empty()));
    }

    #[tokio::test]
    async fn test_scan_all_groups_aborts_on_failure() {
        let store = store();
        store.set_owner(CHROOT, "g2", "orders", "1", "clientX");
        store.fail_path(&format!("{}/1", owners_path(CHROOT, "g2", "orders")), "connection loss");

        let err = scan_all_groups(&store, CHROOT, "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(
            err.to_string().starts_with("failed to fetch group `g2` data: failed to fetch partition owner"),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn test_scan_all_groups_without_groups_node() {
        let store = MemoryTreeStore::new();
        let err = scan_all_groups(&store, CHROOT, "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "failed to fetch consumer groups: node does not exist");
    }

    /// Releases the owner node at `released` right after its parent is
    /// listed, as a rebalance racing the scan would.
    struct ReleasingStore {
        inner: MemoryTreeStore,
        listed: String,
        released: String,
    }

    impl ReleasingStore {
        fn new(group: &str, partition: i32) -> Self {
            let listed = owners_path(CHROOT, group, "orders");
            Self {
                inner: store(),
                released: format!("{}/{}", listed, partition),
                listed,
            }
        }
    }

    #[async_trait::async_trait]
    impl TreeStore for ReleasingStore {
        async fn children(&self, path: &str) -> std::result::Result<Vec<String>, TreeError> {
            let children = self.inner.children(path).await?;
            if path == self.listed {
                self.inner.remove(&self.released);
            }
            Ok(children)
        }

        async fn get(&self, path: &str) -> std::result::Result<bytes::Bytes, TreeError> {
            self.inner.get(path).await
        }

        async fn close(&self) {
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn test_owner_released_during_scan_is_fatal() {
        let store = ReleasingStore::new("g1", 1);
        let err = scan_group_topic(&store, CHROOT, "g1", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.to_string(),
            "failed to fetch partition owner, partition=1: node does not exist"
        );

        let store = ReleasingStore::new("g1", 2);
        let err = scan_all_groups(&store, CHROOT, "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.to_string(),
            "failed to fetch group `g1` data: failed to fetch partition owner, partition=2: node does not exist"
        );
    }
}
