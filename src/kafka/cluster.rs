//! Seams towards the Kafka cluster.
//!
//! Request and response bodies are the `kafka-protocol` message structs. How
//! they are framed and sent over the wire is up to the implementation; the
//! admin code only builds requests and interprets responses.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kafka_protocol::messages::{
    ListOffsetsRequest, ListOffsetsResponse, OffsetCommitRequest, OffsetCommitResponse,
    OffsetFetchRequest, OffsetFetchResponse,
};

/// A broker acting as partition leader.
#[async_trait]
pub trait Broker: Send + Sync {
    fn id(&self) -> i32;

    async fn list_offsets(
        &self,
        version: i16,
        request: ListOffsetsRequest,
    ) -> Result<ListOffsetsResponse>;
}

/// A broker acting as group coordinator.
#[async_trait]
pub trait Coordinator: Send + Sync {
    fn id(&self) -> i32;

    async fn offset_fetch(
        &self,
        version: i16,
        request: OffsetFetchRequest,
    ) -> Result<OffsetFetchResponse>;

    async fn offset_commit(
        &self,
        version: i16,
        request: OffsetCommitRequest,
    ) -> Result<OffsetCommitResponse>;
}

/// Cluster metadata view: partitions, leaders and coordinators.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Returns the partitions of `topic` in the order the cluster reports them.
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>>;

    async fn leader(&self, topic: &str, partition: i32) -> Result<Arc<dyn Broker>>;

    async fn coordinator(&self, group: &str) -> Result<Arc<dyn Coordinator>>;

    async fn close(&self);
}
