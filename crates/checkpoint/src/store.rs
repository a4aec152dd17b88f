//! Checkpoint storage trait and types
//!
//! This module defines the CheckpointStore trait for backend-agnostic
//! checkpoint storage operations, plus the stored record type.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Checkpoint data stored in backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCheckpoint {
    /// Partition the checkpoint belongs to
    pub partition_id: String,
    /// Sequence number (or offset) of the last item handed to the consumer
    pub sequence: i64,
    /// Timestamp when the checkpoint was written
    pub updated_at: DateTime<Utc>,
}

impl PartitionCheckpoint {
    pub fn new(partition_id: impl Into<String>, sequence: i64) -> Self {
        Self {
            partition_id: partition_id.into(),
            sequence,
            updated_at: Utc::now(),
        }
    }
}

/// Trait for checkpoint storage operations.
///
/// Implementations must reject a checkpoint whose sequence is lower than the
/// one already stored for the same partition. Re-storing the same sequence is
/// accepted.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint in the storage backend.
    async fn store_checkpoint(&self, checkpoint: &PartitionCheckpoint) -> Result<()>;

    /// Read a partition's checkpoint from the storage backend.
    ///
    /// Returns None if the partition has never been checkpointed.
    async fn read_checkpoint(&self, partition_id: &str) -> Result<Option<PartitionCheckpoint>>;
}

/// Fail if `next` would move `current` backwards.
pub fn ensure_forward(
    current: Option<&PartitionCheckpoint>,
    next: &PartitionCheckpoint,
) -> Result<()> {
    if let Some(current) = current {
        if next.sequence < current.sequence {
            anyhow::bail!(
                "Refusing to rewind checkpoint for partition {}: stored sequence {}, requested {}",
                next.partition_id,
                current.sequence,
                next.sequence
            );
        }
    }
    Ok(())
}
