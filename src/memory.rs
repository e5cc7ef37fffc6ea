//! In-memory cluster and tree store.
//!
//! Full implementations of the collaborator traits backed by shared maps,
//! for tests and local tooling that should not need a running cluster.
//! Failures can be injected per broker, per partition and per tree path.

use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use kafka_protocol::messages::list_offsets_response::{
    ListOffsetsPartitionResponse, ListOffsetsTopicResponse,
};
use kafka_protocol::messages::offset_commit_response::{
    OffsetCommitResponsePartition, OffsetCommitResponseTopic,
};
use kafka_protocol::messages::offset_fetch_response::{
    OffsetFetchResponsePartition, OffsetFetchResponseTopic,
};
use kafka_protocol::messages::*;
use kafka_protocol::protocol::StrBytes;
use log::debug;

use crate::config::{KafkaConfig, TreeStoreConfig};
use crate::connections::Connector;
use crate::kafka::protocol::OFFSET_OLDEST;
use crate::kafka::{Broker, Cluster, Coordinator};
use crate::tree::{groups_path, owners_path, TreeError, TreeStore};

const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;

type PartitionKey = (String, i32);
type OffsetKey = (String, String, i32); // (group, topic, partition)

/// A broker that leads partitions and coordinates groups.
pub struct MemoryBroker {
    id: i32,
    /// topic/partition -> (oldest, newest)
    logs: DashMap<PartitionKey, (i64, i64)>,
    committed: DashMap<OffsetKey, (i64, String)>,
    commit_errors: DashMap<PartitionKey, i16>,
    fetch_errors: DashMap<PartitionKey, i16>,
    /// Top level OffsetFetch error code, 0 when healthy.
    fetch_error_code: AtomicI16,
    null_metadata: AtomicBool,
    empty_commit_response: AtomicBool,
    omitted_blocks: DashSet<PartitionKey>,
    failure: Mutex<Option<String>>,
    delay_ms: AtomicU64,
    list_offsets_calls: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            logs: DashMap::new(),
            committed: DashMap::new(),
            commit_errors: DashMap::new(),
            fetch_errors: DashMap::new(),
            fetch_error_code: AtomicI16::new(0),
            null_metadata: AtomicBool::new(false),
            empty_commit_response: AtomicBool::new(false),
            omitted_blocks: DashSet::new(),
            failure: Mutex::new(None),
            delay_ms: AtomicU64::new(0),
            list_offsets_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_log(&self, topic: &str, partition: i32, oldest: i64, newest: i64) {
        self.logs.insert((topic.to_string(), partition), (oldest, newest));
    }

    pub fn remove_log(&self, topic: &str, partition: i32) {
        self.logs.remove(&(topic.to_string(), partition));
    }

    /// Makes every subsequent request fail at the transport level.
    pub fn fail_requests(&self, reason: &str) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(reason.to_string());
        }
    }

    /// Makes commits for `topic/partition` fail with `error_code`.
    pub fn reject_commit(&self, topic: &str, partition: i32, error_code: i16) {
        self.commit_errors.insert((topic.to_string(), partition), error_code);
    }

    /// Makes offset fetches for `topic/partition` fail with `error_code`.
    pub fn reject_fetch(&self, topic: &str, partition: i32, error_code: i16) {
        self.fetch_errors.insert((topic.to_string(), partition), error_code);
    }

    /// Makes every offset fetch fail as a whole with `error_code`.
    pub fn fail_fetch(&self, error_code: i16) {
        self.fetch_error_code.store(error_code, Ordering::Relaxed);
    }

    /// While set, offset fetches report null metadata, as brokers do for
    /// offsets committed without any.
    pub fn send_null_metadata(&self, enabled: bool) {
        self.null_metadata.store(enabled, Ordering::Relaxed);
    }

    /// While set, commits are applied but answered without any topic.
    pub fn send_empty_commit_response(&self, enabled: bool) {
        self.empty_commit_response.store(enabled, Ordering::Relaxed);
    }

    /// Leaves `topic/partition` out of every response.
    pub fn omit_block(&self, topic: &str, partition: i32) {
        self.omitted_blocks.insert((topic.to_string(), partition));
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<(i64, String)> {
        self.committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|entry| entry.value().clone())
    }

    pub fn list_offsets_calls(&self) -> usize {
        self.list_offsets_calls.load(Ordering::Relaxed)
    }

    async fn before_request(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failure = self
            .failure
            .lock()
            .map_err(|_| anyhow!("broker {} state is poisoned", self.id))?
            .clone();
        match failure {
            Some(reason) => Err(anyhow!("broker {}: {}", self.id, reason)),
            None => Ok(()),
        }
    }

    fn is_omitted(&self, topic: &str, partition: i32) -> bool {
        self.omitted_blocks.contains(&(topic.to_string(), partition))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn id(&self) -> i32 {
        self.id
    }

    async fn list_offsets(
        &self,
        _version: i16,
        request: ListOffsetsRequest,
    ) -> Result<ListOffsetsResponse> {
        self.list_offsets_calls.fetch_add(1, Ordering::Relaxed);
        self.before_request().await?;

        let mut topic_responses = Vec::new();
        for topic in &request.topics {
            let topic_name = topic.name.to_string();
            let mut partition_responses = Vec::new();

            for partition_req in &topic.partitions {
                let partition_id = partition_req.partition_index;
                if self.is_omitted(&topic_name, partition_id) {
                    continue;
                }
                let response = match self.logs.get(&(topic_name.clone(), partition_id)) {
                    Some(log) => {
                        let (oldest, newest) = *log.value();
                        let offset = if partition_req.timestamp == OFFSET_OLDEST {
                            oldest
                        } else {
                            newest
                        };
                        ListOffsetsPartitionResponse::default()
                            .with_partition_index(partition_id)
                            .with_error_code(0)
                            .with_old_style_offsets(vec![offset])
                    }
                    None => ListOffsetsPartitionResponse::default()
                        .with_partition_index(partition_id)
                        .with_error_code(UNKNOWN_TOPIC_OR_PARTITION),
                };
                partition_responses.push(response);
            }

            topic_responses.push(
                ListOffsetsTopicResponse::default()
                    .with_name(topic.name.clone())
                    .with_partitions(partition_responses),
            );
        }

        Ok(ListOffsetsResponse::default()
            .with_topics(topic_responses)
            .with_throttle_time_ms(0))
    }
}

#[async_trait]
impl Coordinator for MemoryBroker {
    fn id(&self) -> i32 {
        self.id
    }

    async fn offset_fetch(
        &self,
        _version: i16,
        request: OffsetFetchRequest,
    ) -> Result<OffsetFetchResponse> {
        self.before_request().await?;

        let error_code = self.fetch_error_code.load(Ordering::Relaxed);
        if error_code != 0 {
            return Ok(OffsetFetchResponse::default()
                .with_throttle_time_ms(0)
                .with_error_code(error_code));
        }

        let null_metadata = self.null_metadata.load(Ordering::Relaxed);
        let group_id = request.group_id.0.to_string();
        let mut response_topics = Vec::new();
        for topic in request.topics.iter().flatten() {
            let topic_name = topic.name.to_string();
            let mut response_partitions = Vec::new();

            for &partition_id in &topic.partition_indexes {
                if self.is_omitted(&topic_name, partition_id) {
                    continue;
                }
                if let Some(code) = self.fetch_errors.get(&(topic_name.clone(), partition_id)) {
                    response_partitions.push(
                        OffsetFetchResponsePartition::default()
                            .with_partition_index(partition_id)
                            .with_committed_offset(-1)
                            .with_error_code(*code.value()),
                    );
                    continue;
                }
                // No offset committed yet is not an error.
                let (offset, metadata) = self
                    .committed(&group_id, &topic_name, partition_id)
                    .unwrap_or((-1, String::new()));
                let metadata = if null_metadata {
                    None
                } else {
                    Some(StrBytes::from_string(metadata))
                };
                response_partitions.push(
                    OffsetFetchResponsePartition::default()
                        .with_partition_index(partition_id)
                        .with_committed_offset(offset)
                        .with_metadata(metadata)
                        .with_error_code(0),
                );
            }

            response_topics.push(
                OffsetFetchResponseTopic::default()
                    .with_name(topic.name.clone())
                    .with_partitions(response_partitions),
            );
        }

        Ok(OffsetFetchResponse::default()
            .with_throttle_time_ms(0)
            .with_topics(response_topics)
            .with_error_code(0))
    }

    async fn offset_commit(
        &self,
        _version: i16,
        request: OffsetCommitRequest,
    ) -> Result<OffsetCommitResponse> {
        self.before_request().await?;

        let group_id = request.group_id.0.to_string();
        let mut response_topics = Vec::new();
        for topic in &request.topics {
            let topic_name = topic.name.to_string();
            let mut response_partitions = Vec::new();

            for partition in &topic.partitions {
                let partition_id = partition.partition_index;
                let error_code = match self.commit_errors.get(&(topic_name.clone(), partition_id)) {
                    Some(code) => *code.value(),
                    None => {
                        let metadata = partition
                            .committed_metadata
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_default();
                        self.committed.insert(
                            (group_id.clone(), topic_name.clone(), partition_id),
                            (partition.committed_offset, metadata),
                        );
                        debug!(
                            "Committed offset {} for group={}, topic={}, partition={}",
                            partition.committed_offset, group_id, topic_name, partition_id
                        );
                        0
                    }
                };
                response_partitions.push(
                    OffsetCommitResponsePartition::default()
                        .with_partition_index(partition_id)
                        .with_error_code(error_code),
                );
            }

            response_topics.push(
                OffsetCommitResponseTopic::default()
                    .with_name(topic.name.clone())
                    .with_partitions(response_partitions),
            );
        }

        if self.empty_commit_response.load(Ordering::Relaxed) {
            response_topics.clear();
        }
        Ok(OffsetCommitResponse::default()
            .with_throttle_time_ms(0)
            .with_topics(response_topics))
    }
}

#[derive(Default)]
pub struct MemoryCluster {
    brokers: DashMap<i32, Arc<MemoryBroker>>,
    /// topic -> partitions in the order they are reported
    topics: DashMap<String, Vec<i32>>,
    leaders: DashMap<PartitionKey, i32>,
    coordinators: DashMap<String, i32>,
    closed: AtomicBool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_broker(&self, id: i32) -> Arc<MemoryBroker> {
        self.brokers
            .entry(id)
            .or_insert_with(|| Arc::new(MemoryBroker::new(id)))
            .value()
            .clone()
    }

    pub fn broker(&self, id: i32) -> Option<Arc<MemoryBroker>> {
        self.brokers.get(&id).map(|b| b.value().clone())
    }

    /// Registers `topic` without any partition.
    pub fn add_topic(&self, topic: &str) {
        self.topics.entry(topic.to_string()).or_default();
    }

    /// Appends `partition` to `topic`, led by broker `leader` which is
    /// created if needed.
    pub fn add_partition(&self, topic: &str, partition: i32, leader: i32, oldest: i64, newest: i64) {
        self.add_broker(leader).set_log(topic, partition, oldest, newest);
        self.topics.entry(topic.to_string()).or_default().push(partition);
        self.leaders.insert((topic.to_string(), partition), leader);
    }

    pub fn set_coordinator(&self, group: &str, broker_id: i32) {
        self.add_broker(broker_id);
        self.coordinators.insert(group.to_string(), broker_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        self.topics
            .get(topic)
            .map(|partitions| partitions.value().clone())
            .ok_or_else(|| anyhow!("unknown topic, topic={}", topic))
    }

    async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>> {
        let leader = self
            .leaders
            .get(&(topic.to_string(), partition))
            .map(|id| *id.value())
            .ok_or_else(|| anyhow!("no leader, topic={}, partition={}", topic, partition))?;
        let broker: Arc<dyn Broker> = self
            .broker(leader)
            .ok_or_else(|| anyhow!("unknown broker, id={}", leader))?;
        Ok(broker)
    }

    /// Groups without an explicit coordinator are coordinated by the broker
    /// with the lowest id.
    async fn coordinator(&self, group: &str) -> Result<Arc<dyn Coordinator>> {
        let id = match self.coordinators.get(group) {
            Some(id) => *id.value(),
            None => self
                .brokers
                .iter()
                .map(|b| *b.key())
                .min()
                .ok_or_else(|| anyhow!("no brokers available"))?,
        };
        let coordinator: Arc<dyn Coordinator> = self
            .broker(id)
            .ok_or_else(|| anyhow!("unknown broker, id={}", id))?;
        Ok(coordinator)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct MemoryTreeStore {
    nodes: DashMap<String, Bytes>,
    failures: DashMap<String, String>,
    closed: AtomicBool,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the node at `path` along with any missing ancestors.
    pub fn create(&self, path: &str, data: impl Into<Bytes>) {
        let mut ancestor = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if let Some((_, parents)) = segments.split_last() {
            for segment in parents {
                ancestor.push('/');
                ancestor.push_str(segment);
                self.nodes.entry(ancestor.clone()).or_insert_with(Bytes::new);
            }
        }
        self.nodes.insert(path.to_string(), data.into());
    }

    /// Removes `path` and everything below it.
    pub fn remove(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
    }

    pub fn register_group(&self, chroot: &str, group: &str) {
        self.create(&format!("{}/{}", groups_path(chroot), group), Bytes::new());
    }

    pub fn set_owner(&self, chroot: &str, group: &str, topic: &str, partition: &str, client_id: &str) {
        let path = format!("{}/{}", owners_path(chroot, group, topic), partition);
        self.create(&path, Bytes::from(client_id.to_string()));
    }

    /// Makes every read of `path` fail with `reason`.
    pub fn fail_path(&self, path: &str, reason: &str) {
        self.failures.insert(path.to_string(), reason.to_string());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn check_failure(&self, path: &str) -> Result<(), TreeError> {
        match self.failures.get(path) {
            Some(reason) => Err(TreeError::Other(anyhow!("{}: {}", path, reason.value()))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn children(&self, path: &str) -> Result<Vec<String>, TreeError> {
        self.check_failure(path)?;
        if !self.nodes.contains_key(path) {
            return Err(TreeError::NoNode);
        }
        let prefix = format!("{}/", path);
        let mut children: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|node| {
                node.key()
                    .strip_prefix(&prefix)
                    .filter(|name| !name.contains('/'))
                    .map(str::to_string)
            })
            .collect();
        children.sort();
        Ok(children)
    }

    async fn get(&self, path: &str) -> Result<Bytes, TreeError> {
        self.check_failure(path)?;
        self.nodes
            .get(path)
            .map(|data| data.value().clone())
            .ok_or(TreeError::NoNode)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Hands out the same in-memory cluster and tree store on every connect.
pub struct MemoryConnector {
    pub cluster: Arc<MemoryCluster>,
    pub tree_store: Arc<MemoryTreeStore>,
    cluster_connects: AtomicUsize,
    tree_store_connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new(cluster: Arc<MemoryCluster>, tree_store: Arc<MemoryTreeStore>) -> Self {
        Self {
            cluster,
            tree_store,
            cluster_connects: AtomicUsize::new(0),
            tree_store_connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    /// While set, every connect attempt fails.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }

    pub fn cluster_connects(&self) -> usize {
        self.cluster_connects.load(Ordering::Relaxed)
    }

    pub fn tree_store_connects(&self) -> usize {
        self.tree_store_connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect_cluster(&self, cfg: &KafkaConfig) -> Result<Arc<dyn Cluster>> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(anyhow!("connection refused, seed_peers={:?}", cfg.seed_peers));
        }
        self.cluster_connects.fetch_add(1, Ordering::Relaxed);
        Ok(self.cluster.clone())
    }

    async fn connect_tree_store(&self, cfg: &TreeStoreConfig) -> Result<Arc<dyn TreeStore>> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(anyhow!("connection refused, seed_peers={:?}", cfg.seed_peers));
        }
        self.tree_store_connects.fetch_add(1, Ordering::Relaxed);
        Ok(self.tree_store.clone())
    }
}
