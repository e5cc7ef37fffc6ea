use kafka_protocol::messages::list_offsets_request::{ListOffsetsPartition, ListOffsetsTopic};
use kafka_protocol::messages::list_offsets_response::ListOffsetsPartitionResponse;
use kafka_protocol::messages::offset_commit_request::{
    OffsetCommitRequestPartition, OffsetCommitRequestTopic,
};
use kafka_protocol::messages::offset_commit_response::OffsetCommitResponsePartition;
use kafka_protocol::messages::offset_fetch_request::OffsetFetchRequestTopic;
use kafka_protocol::messages::offset_fetch_response::OffsetFetchResponsePartition;
use kafka_protocol::messages::*;
use kafka_protocol::protocol::StrBytes;

use super::types::PartitionOffset;
use crate::error::{Error, Result};

// Oldest versions the deployed clusters support. ListOffsets v0 is the only
// one that returns a list of offsets per partition.
pub const LIST_OFFSETS_VERSION: i16 = 0;
pub const OFFSET_FETCH_VERSION: i16 = 1;
pub const OFFSET_COMMIT_VERSION: i16 = 1;

pub const OFFSET_NEWEST: i64 = -1;
pub const OFFSET_OLDEST: i64 = -2;

/// Generation used for administrative commits made outside of any group
/// generation.
pub const GENERATION_UNDEFINED: i32 = -1;

/// Commit timestamp that tells the coordinator to use the time it received
/// the request.
pub const RECEIVE_TIME: i64 = -1;

const CONSUMER_REPLICA_ID: i32 = -1;

pub(crate) fn topic_name(topic: &str) -> TopicName {
    TopicName(StrBytes::from_string(topic.to_string()))
}

pub(crate) fn group_id(group: &str) -> GroupId {
    GroupId(StrBytes::from_string(group.to_string()))
}

fn is_named(name: &StrBytes, expected: &str) -> bool {
    &**name == expected
}

/// Builds a request asking for one offset per partition at `timestamp`,
/// which is either [`OFFSET_OLDEST`] or [`OFFSET_NEWEST`].
pub fn list_offsets_request(
    topic: &str,
    partitions: impl IntoIterator<Item = i32>,
    timestamp: i64,
) -> ListOffsetsRequest {
    let partitions = partitions
        .into_iter()
        .map(|partition| {
            ListOffsetsPartition::default()
                .with_partition_index(partition)
                .with_timestamp(timestamp)
                .with_max_num_offsets(1)
        })
        .collect();

    ListOffsetsRequest::default()
        .with_replica_id(BrokerId(CONSUMER_REPLICA_ID))
        .with_topics(vec![ListOffsetsTopic::default()
            .with_name(topic_name(topic))
            .with_partitions(partitions)])
}

fn list_offsets_block<'a>(
    response: &'a ListOffsetsResponse,
    topic: &str,
    partition: i32,
) -> Option<&'a ListOffsetsPartitionResponse> {
    response
        .topics
        .iter()
        .filter(|t| is_named(&t.name, topic))
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition)
}

/// Extracts the single offset a broker returned for `topic/partition`.
pub fn available_offset(response: &ListOffsetsResponse, topic: &str, partition: i32) -> Result<i64> {
    let block = list_offsets_block(response, topic, partition)
        .ok_or_else(|| Error::protocol(format!("{}/{}, no data", topic, partition)))?;
    if block.error_code != 0 {
        return Err(Error::remote(
            format!("{}/{}, fetch error", topic, partition),
            block.error_code,
        ));
    }
    block
        .old_style_offsets
        .first()
        .copied()
        .ok_or_else(|| Error::protocol(format!("{}/{}, no offset", topic, partition)))
}

pub fn offset_fetch_request(group: &str, topic: &str, partitions: &[i32]) -> OffsetFetchRequest {
    OffsetFetchRequest::default()
        .with_group_id(group_id(group))
        .with_topics(Some(vec![OffsetFetchRequestTopic::default()
            .with_name(topic_name(topic))
            .with_partition_indexes(partitions.to_vec())]))
}

pub fn offset_fetch_block<'a>(
    response: &'a OffsetFetchResponse,
    topic: &str,
    partition: i32,
) -> Option<&'a OffsetFetchResponsePartition> {
    response
        .topics
        .iter()
        .filter(|t| is_named(&t.name, topic))
        .flat_map(|t| t.partitions.iter())
        .find(|p| p.partition_index == partition)
}

pub fn offset_commit_request(
    group: &str,
    topic: &str,
    offsets: &[PartitionOffset],
) -> OffsetCommitRequest {
    let partitions = offsets
        .iter()
        .map(|po| {
            OffsetCommitRequestPartition::default()
                .with_partition_index(po.partition)
                .with_committed_offset(po.offset)
                .with_commit_timestamp(RECEIVE_TIME)
                .with_committed_metadata(Some(StrBytes::from_string(po.metadata.clone())))
        })
        .collect();

    OffsetCommitRequest::default()
        .with_group_id(group_id(group))
        .with_generation_id_or_member_epoch(GENERATION_UNDEFINED)
        .with_topics(vec![OffsetCommitRequestTopic::default()
            .with_name(topic_name(topic))
            .with_partitions(partitions)])
}

/// Per-partition commit results for `topic`, in response order.
pub fn offset_commit_results<'a>(
    response: &'a OffsetCommitResponse,
    topic: &'a str,
) -> impl Iterator<Item = &'a OffsetCommitResponsePartition> + 'a {
    response
        .topics
        .iter()
        .filter(move |t| is_named(&t.name, topic))
        .flat_map(|t| t.partitions.iter())
}
