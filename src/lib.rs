//! Administrative operations on a Kafka cluster: inspecting and overwriting
//! consumer group offsets, and discovering which clients consume which
//! partitions.

pub mod admin;
pub mod config;
pub mod connections;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod tree;

pub use admin::Admin;
pub use config::AdminConfig;
pub use error::{Error, ErrorKind, Result};
pub use kafka::PartitionOffset;
pub use tree::{ClusterOwnershipMap, OwnershipMap};
