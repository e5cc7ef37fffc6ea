use std::sync::Arc;

use futures::future::{join_all, try_join};
use indexmap::IndexMap;
use log::{debug, warn};
use tokio::sync::mpsc;

use super::cluster::{Broker, Cluster};
use super::protocol::{self, LIST_OFFSETS_VERSION, OFFSET_NEWEST, OFFSET_OLDEST};
use super::types::{IndexedPartition, PartitionOffset};
use crate::error::{Error, Result, ResultExt};

/// Partitions of a topic led by one broker.
struct BrokerAssignment {
    broker: Arc<dyn Broker>,
    partitions: Vec<IndexedPartition>,
}

/// Returns the oldest and newest available offset of every partition of
/// `topic`. The result is positioned by the order the cluster lists the
/// partitions in; commit fields are left at their defaults.
///
/// Every leader broker is queried concurrently. If any of them fails the
/// whole call fails and nothing is returned.
pub async fn fetch_range(cluster: &dyn Cluster, topic: &str) -> Result<Vec<PartitionOffset>> {
    let partitions = cluster
        .partitions(topic)
        .await
        .map_err(|e| Error::connection("failed to get topic partitions", e))?;
    if partitions.is_empty() {
        return Ok(Vec::new());
    }

    let assignments = assign_leaders(cluster, topic, &partitions).await?;
    debug!(
        "Fetching offset range: topic={}, partitions={}, brokers={}",
        topic,
        partitions.len(),
        assignments.len()
    );

    let (errors_tx, mut errors_rx) = mpsc::channel::<Error>(assignments.len());
    let tasks = assignments.values().map(|assignment| {
        let errors_tx = errors_tx.clone();
        async move {
            match fetch_broker_range(topic, assignment).await {
                Ok(ranges) => Some(ranges),
                Err(e) => {
                    // One slot per broker, so this never drops an error.
                    let _ = errors_tx.try_send(e);
                    None
                }
            }
        }
    });
    let results = join_all(tasks).await;
    drop(errors_tx);

    // If we failed to get offset range for at least one broker then report
    // the first error that was delivered.
    if let Ok(err) = errors_rx.try_recv() {
        warn!("Failed to fetch offset range: topic={}, error={}", topic, err);
        return Err(err);
    }

    let mut offsets = vec![PartitionOffset::default(); partitions.len()];
    for (index, range) in results.into_iter().flatten().flatten() {
        offsets[index] = range;
    }
    Ok(offsets)
}

/// Figures out the distribution of partitions among their leaders. Buckets
/// keep the order in which brokers were first seen.
async fn assign_leaders(
    cluster: &dyn Cluster,
    topic: &str,
    partitions: &[i32],
) -> Result<IndexMap<i32, BrokerAssignment>> {
    let mut assignments: IndexMap<i32, BrokerAssignment> = IndexMap::new();
    for (index, &partition) in partitions.iter().enumerate() {
        let broker = cluster.leader(topic, partition).await.map_err(|e| {
            Error::connection(format!("failed to get partition leader, partition={}", partition), e)
        })?;
        assignments
            .entry(broker.id())
            .or_insert_with(|| BrokerAssignment {
                broker,
                partitions: Vec::new(),
            })
            .partitions
            .push(IndexedPartition { index, partition });
    }
    Ok(assignments)
}

/// Queries one broker for the oldest and newest offsets of the partitions it
/// leads. Returns `(original index, range)` pairs.
async fn fetch_broker_range(
    topic: &str,
    assignment: &BrokerAssignment,
) -> Result<Vec<(usize, PartitionOffset)>> {
    let broker = &assignment.broker;
    let broker_id = broker.id();
    let ids = || assignment.partitions.iter().map(|xp| xp.partition);

    let oldest = async {
        broker
            .list_offsets(
                LIST_OFFSETS_VERSION,
                protocol::list_offsets_request(topic, ids(), OFFSET_OLDEST),
            )
            .await
            .map_err(|e| {
                Error::connection(format!("failed to fetch oldest offset, broker={}", broker_id), e)
            })
    };
    let newest = async {
        broker
            .list_offsets(
                LIST_OFFSETS_VERSION,
                protocol::list_offsets_request(topic, ids(), OFFSET_NEWEST),
            )
            .await
            .map_err(|e| {
                Error::connection(format!("failed to fetch newest offset, broker={}", broker_id), e)
            })
    };
    let (res_oldest, res_newest) = try_join(oldest, newest).await?;

    let mut ranges = Vec::with_capacity(assignment.partitions.len());
    for xp in &assignment.partitions {
        let begin = protocol::available_offset(&res_oldest, topic, xp.partition)
            .with_context(|| format!("failed to fetch oldest offset, broker={}", broker_id))?;
        let end = protocol::available_offset(&res_newest, topic, xp.partition)
            .with_context(|| format!("failed to fetch newest offset, broker={}", broker_id))?;
        ranges.push((
            xp.index,
            PartitionOffset {
                partition: xp.partition,
                begin,
                end,
                ..Default::default()
            },
        ));
    }
    debug!(
        "Fetched offset range: topic={}, broker={}, partitions={}",
        topic,
        broker_id,
        ranges.len()
    );
    Ok(ranges)
}
