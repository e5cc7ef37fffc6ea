use serde::{Deserialize, Serialize};

/// Offset range of a single partition together with the offset and metadata
/// last committed by a consumer group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionOffset {
    /// Partition ID
    pub partition: i32,
    /// Oldest offset still available in the partition log
    pub begin: i64,
    /// Offset the next produced message will get
    pub end: i64,
    /// Offset committed by the group
    pub offset: i64,
    /// Metadata committed along with the offset
    pub metadata: String,
}

impl PartitionOffset {
    /// Creates a record carrying only the commit payload, as used by
    /// [`crate::Admin::set_group_offsets`].
    pub fn commit(partition: i32, offset: i64, metadata: impl Into<String>) -> Self {
        Self {
            partition,
            offset,
            metadata: metadata.into(),
            ..Default::default()
        }
    }
}

/// Offset and metadata committed by a group for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedOffset {
    pub offset: i64,
    pub metadata: String,
}

/// A partition remembered together with its position in the topic's
/// partition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexedPartition {
    pub index: usize,
    pub partition: i32,
}
