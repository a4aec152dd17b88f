//! In-memory checkpoint storage.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::store::{ensure_forward, CheckpointStore, PartitionCheckpoint};

/// In-memory implementation of CheckpointStore trait.
///
/// Checkpoints live as long as the store; useful for tests and for brokers
/// that do not need to survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    checkpoints: Mutex<HashMap<String, PartitionCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored checkpoint.
    pub async fn all(&self) -> Vec<PartitionCheckpoint> {
        let checkpoints = self.checkpoints.lock().await;
        let mut all: Vec<_> = checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        all
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn store_checkpoint(&self, checkpoint: &PartitionCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock().await;
        ensure_forward(checkpoints.get(&checkpoint.partition_id), checkpoint)?;
        checkpoints.insert(checkpoint.partition_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn read_checkpoint(&self, partition_id: &str) -> Result<Option<PartitionCheckpoint>> {
        Ok(self.checkpoints.lock().await.get(partition_id).cloned())
    }
}
