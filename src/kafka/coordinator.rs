use log::{debug, info};

use super::cluster::Cluster;
use super::protocol::{self, OFFSET_COMMIT_VERSION, OFFSET_FETCH_VERSION};
use super::types::{CommittedOffset, PartitionOffset};
use crate::error::{Error, Result};

/// Fetches the offsets `group` last committed for `partitions` of `topic`.
/// The result is positioned like `partitions`.
pub async fn fetch_committed(
    cluster: &dyn Cluster,
    group: &str,
    topic: &str,
    partitions: &[i32],
) -> Result<Vec<CommittedOffset>> {
    let coordinator = cluster
        .coordinator(group)
        .await
        .map_err(|e| Error::connection("failed to get coordinator", e))?;

    let req = protocol::offset_fetch_request(group, topic, partitions);
    let res = coordinator
        .offset_fetch(OFFSET_FETCH_VERSION, req)
        .await
        .map_err(|e| Error::connection("failed to fetch offsets", e))?;
    if res.error_code != 0 {
        return Err(Error::remote(
            format!("failed to fetch offsets, group={}", group),
            res.error_code,
        ));
    }

    let mut committed = Vec::with_capacity(partitions.len());
    for &partition in partitions {
        let block = protocol::offset_fetch_block(&res, topic, partition).ok_or_else(|| {
            Error::protocol(format!("offset block is missing, partition={}", partition))
        })?;
        if block.error_code != 0 {
            return Err(Error::remote(
                format!("failed to fetch offset, partition={}", partition),
                block.error_code,
            ));
        }
        committed.push(CommittedOffset {
            offset: block.committed_offset,
            metadata: block
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_default(),
        });
    }
    debug!(
        "Fetched committed offsets: group={}, topic={}, coordinator={}, partitions={}",
        group,
        topic,
        coordinator.id(),
        committed.len()
    );
    Ok(committed)
}

/// Commits `offsets` on behalf of `group` in a single request.
///
/// The commit is not atomic: if the coordinator rejects a partition the
/// error for the first rejected one is returned, and the state of the other
/// partitions of the batch is unspecified.
pub async fn commit(
    cluster: &dyn Cluster,
    group: &str,
    topic: &str,
    offsets: &[PartitionOffset],
) -> Result<()> {
    let coordinator = cluster
        .coordinator(group)
        .await
        .map_err(|e| Error::connection("failed to get coordinator", e))?;
    if offsets.is_empty() {
        return Ok(());
    }

    let req = protocol::offset_commit_request(group, topic, offsets);
    let res = coordinator
        .offset_commit(OFFSET_COMMIT_VERSION, req)
        .await
        .map_err(|e| Error::connection("failed to commit offsets", e))?;

    let mut acknowledged = 0;
    for result in protocol::offset_commit_results(&res, topic) {
        if result.error_code != 0 {
            return Err(Error::remote(
                format!("failed to commit offset, partition={}", result.partition_index),
                result.error_code,
            ));
        }
        acknowledged += 1;
    }
    if acknowledged == 0 {
        return Err(Error::protocol(format!(
            "commit response has no results, topic={}",
            topic
        )));
    }

    info!(
        "Committed offsets: group={}, topic={}, coordinator={}, partitions={}",
        group,
        topic,
        coordinator.id(),
        acknowledged
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryCluster;

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster.add_partition("orders", 0, 1, 0, 10);
        cluster.add_partition("orders", 1, 2, 0, 10);
        cluster.add_partition("orders", 2, 1, 0, 10);
        cluster.set_coordinator("g1", 2);
        cluster
    }

    #[tokio::test]
    async fn test_commit_then_fetch() {
        let cluster = cluster();
        commit(&cluster, "g1", "orders", &[PartitionOffset::commit(1, 42, "chk1")])
            .await
            .unwrap();
        assert_eq!(
            cluster.broker(2).unwrap().committed("g1", "orders", 1),
            Some((42, "chk1".to_string()))
        );

        let committed = fetch_committed(&cluster, "g1", "orders", &[2, 1]).await.unwrap();
        assert_eq!(
            committed,
            vec![
                CommittedOffset { offset: -1, metadata: String::new() },
                CommittedOffset { offset: 42, metadata: "chk1".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_block() {
        let cluster = cluster();
        cluster.broker(2).unwrap().omit_block("orders", 2);

        let err = fetch_committed(&cluster, "g1", "orders", &[0, 1, 2]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "offset block is missing, partition=2");
    }

    #[tokio::test]
    async fn test_commit_stops_at_first_rejected_partition() {
        let cluster = cluster();
        let coordinator = cluster.broker(2).unwrap();
        coordinator.reject_commit("orders", 1, 25);
        coordinator.reject_commit("orders", 2, 22);

        let offsets = [
            PartitionOffset::commit(0, 5, "a"),
            PartitionOffset::commit(1, 6, "b"),
            PartitionOffset::commit(2, 7, "c"),
        ];
        let err = commit(&cluster, "g1", "orders", &offsets).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(matches!(err, Error::Remote { code: 25, .. }));
        assert!(err.to_string().starts_with("failed to commit offset, partition=1: "));

        // Not atomic: the partition before the rejected one went through.
        assert_eq!(coordinator.committed("g1", "orders", 0), Some((5, "a".to_string())));
        assert_eq!(coordinator.committed("g1", "orders", 1), None);
    }

    #[tokio::test]
    async fn test_coordinator_unreachable() {
        let cluster = cluster();
        cluster.broker(2).unwrap().fail_requests("connection refused");

        let err = fetch_committed(&cluster, "g1", "orders", &[0]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().starts_with("failed to fetch offsets: "));

        let err = commit(&cluster, "g1", "orders", &[PartitionOffset::commit(0, 1, "")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().starts_with("failed to commit offsets: "));
    }

    #[tokio::test]
    async fn test_fetch_partition_error_code() {
        let cluster = cluster();
        cluster.broker(2).unwrap().reject_fetch("orders", 1, 16);

        let err = fetch_committed(&cluster, "g1", "orders", &[0, 1, 2]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(matches!(err, Error::Remote { code: 16, .. }));
        assert_eq!(
            err.to_string(),
            "failed to fetch offset, partition=1: NotCoordinator (code 16)"
        );
    }

    #[tokio::test]
    async fn test_fetch_group_error_code() {
        let cluster = cluster();
        cluster.broker(2).unwrap().fail_fetch(15);

        let err = fetch_committed(&cluster, "g1", "orders", &[0]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(matches!(err, Error::Remote { code: 15, .. }));
        assert!(err.to_string().starts_with("failed to fetch offsets, group=g1: "), "{}", err);
    }

    #[tokio::test]
    async fn test_fetch_null_metadata() {
        let cluster = cluster();
        let coordinator = cluster.broker(2).unwrap();
        commit(&cluster, "g1", "orders", &[PartitionOffset::commit(0, 7, "ignored")])
            .await
            .unwrap();
        coordinator.send_null_metadata(true);

        let committed = fetch_committed(&cluster, "g1", "orders", &[0]).await.unwrap();
        assert_eq!(committed, vec![CommittedOffset { offset: 7, metadata: String::new() }]);
    }

    #[tokio::test]
    async fn test_commit_response_without_results() {
        let cluster = cluster();
        cluster.broker(2).unwrap().send_empty_commit_response(true);

        let err = commit(&cluster, "g1", "orders", &[PartitionOffset::commit(0, 5, "")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.to_string(), "commit response has no results, topic=orders");
    }

    #[tokio::test]
    async fn test_commit_nothing() {
        let cluster = cluster();
        cluster.broker(2).unwrap().fail_requests("connection refused");
        commit(&cluster, "g1", "orders", &[]).await.unwrap();
    }
}
