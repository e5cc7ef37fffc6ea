pub mod cluster;
pub mod coordinator;
pub mod offsets;
pub mod protocol;
pub mod types;

pub use cluster::{Broker, Cluster, Coordinator};
pub use types::{CommittedOffset, PartitionOffset};
