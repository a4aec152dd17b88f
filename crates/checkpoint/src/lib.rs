//! Checkpoint storage for eventflow
//!
//! A checkpoint records the last item of a partition that has been handed to
//! the consumer. Partition workers only ever advance their own partition's
//! checkpoint, so stores never need a lock spanning partitions.
//!
//! # Architecture
//!
//! - `CheckpointStore` trait: version-agnostic read/write of a partition's checkpoint
//! - `PartitionCheckpoint`: the stored record (partition id, sequence, timestamp)
//!
//! ## Storage Backends
//!
//! - `MemoryStore` - Keeps checkpoints in process memory
//! - `FilesystemStore` - Stores one JSON file per partition
//!
//! Every backend refuses to move a checkpoint backwards.

mod filesystem;
mod memory;
pub mod store;


// Re-export store trait and types
pub use store::{ensure_forward, CheckpointStore, PartitionCheckpoint};

// Re-export storage implementations
pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
