//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::store::{ensure_forward, CheckpointStore, PartitionCheckpoint};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores each partition's checkpoint as `checkpoint_<partition>.json` in a
/// directory. Writes go to a temporary file first and are renamed into place,
/// so a reader never sees a half-written checkpoint.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, partition_id: &str) -> Result<PathBuf> {
        if partition_id.is_empty()
            || partition_id.contains(['/', '\\'])
            || partition_id.starts_with('.')
        {
            anyhow::bail!("Invalid partition id for checkpoint file: '{partition_id}'");
        }
        Ok(self.dir.join(format!("checkpoint_{partition_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, checkpoint: &PartitionCheckpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.partition_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let current = self.read_checkpoint(&checkpoint.partition_id).await?;
        ensure_forward(current.as_ref(), checkpoint)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(
            partition = %checkpoint.partition_id,
            sequence = checkpoint.sequence,
            "Stored checkpoint to {}",
            path.display()
        );
        Ok(())
    }

    async fn read_checkpoint(&self, partition_id: &str) -> Result<Option<PartitionCheckpoint>> {
        let path = self.path_for(partition_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse checkpoint file {}", path.display())
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
