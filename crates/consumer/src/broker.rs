//! The broker contract the engine is written against.
//!
//! A [`Processor`] owns the connection to the broker. It hands out
//! [`PartitionClient`]s as the broker's load balancing assigns partitions to
//! this consumer, and its [`Processor::run`] loop drives that balancing.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One item read from a partition, before envelope decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Position of the item within its partition (offset or sequence number)
    pub sequence: i64,
    /// Raw envelope bytes
    pub body: Vec<u8>,
    /// Message key (if any)
    pub key: Option<Vec<u8>>,
    /// Enqueue timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl RawEvent {
    pub fn new(sequence: i64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            body: body.into(),
            key: None,
            timestamp: None,
        }
    }
}

/// Handle to a single owned partition.
#[async_trait]
pub trait PartitionClient: Send + 'static {
    /// Identifier of the partition, used as its checkpoint key.
    fn partition_id(&self) -> &str;

    /// Receive up to `max_count` items, waiting at most `wait`.
    ///
    /// An empty batch means the wait elapsed without items and is not an
    /// error. Returns [`crate::Error::PartitionClosed`] once the partition has
    /// been revoked or the broker has stopped.
    async fn receive(&mut self, max_count: usize, wait: Duration) -> Result<Vec<RawEvent>>;

    /// Record `event` as the last item handed to the consumer.
    async fn commit(&mut self, event: &RawEvent) -> Result<()>;

    /// Release the partition. Called exactly once when its worker exits.
    async fn close(&mut self);
}

/// Broker-side consumer that assigns partitions.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Partition: PartitionClient;

    /// Wait for the next partition assigned to this consumer.
    ///
    /// Returns `None` once no further assignments will be made. Must be cancel
    /// safe: dropping the future before it completes loses no assignment.
    async fn next_partition(&self) -> Option<Self::Partition>;

    /// Hand out a fresh client for a partition whose worker failed.
    ///
    /// Returns `None` when the partition is no longer owned by this consumer
    /// or cannot be resumed; the partition then stays stopped.
    async fn reacquire(&self, _partition_id: &str) -> Option<Self::Partition> {
        None
    }

    /// Drive the broker until `cancel` fires or a fatal error occurs.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Release the consumer handle. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}
