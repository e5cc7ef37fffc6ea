//! Hierarchical coordination store (ZooKeeper-like) holding consumer group
//! registrations and partition ownership:
//!
//! ```text
//! {chroot}/consumers/{group}/owners/{topic}/{partition} = client id
//! ```

pub mod owners;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error as ThisError;

/// Client id -> ascending partitions owned by that client.
pub type OwnershipMap = HashMap<String, Vec<i32>>;

/// Group id -> ownership map of a topic within that group.
pub type ClusterOwnershipMap = HashMap<String, OwnershipMap>;

#[derive(Debug, ThisError)]
pub enum TreeError {
    #[error("node does not exist")]
    NoNode,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Names of the immediate children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>, TreeError>;

    async fn get(&self, path: &str) -> Result<Bytes, TreeError>;

    async fn close(&self);
}

pub fn groups_path(chroot: &str) -> String {
    format!("{}/consumers", chroot)
}

pub fn owners_path(chroot: &str, group: &str, topic: &str) -> String {
    format!("{}/consumers/{}/owners/{}", chroot, group, topic)
}
