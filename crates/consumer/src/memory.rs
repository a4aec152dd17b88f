//! In-memory partitioned broker.
//!
//! Each partition is an append-only log addressed by sequence number.
//! Commits go to a [`CheckpointStore`], and a partition handed out again after a
//! restart resumes right after its stored checkpoint. Every partition is handed
//! out once per broker; there is no rebalancing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use checkpoint::{CheckpointStore, PartitionCheckpoint};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::{PartitionClient, Processor, RawEvent};
use crate::error::{Error, Result};

struct PartitionLog {
    id: String,
    events: Mutex<Vec<Vec<u8>>>,
    appended: Notify,
}

struct Shared {
    partitions: Vec<Arc<PartitionLog>>,
    unassigned: Mutex<VecDeque<usize>>,
    store: Arc<dyn CheckpointStore>,
    closed: CancellationToken,
    released: AtomicUsize,
}

/// Broker whose partitions live in process memory.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create a broker with partitions named `"0"` to `"{count - 1}"`.
    pub fn new(partition_count: usize, store: Arc<dyn CheckpointStore>) -> Self {
        let partitions = (0..partition_count)
            .map(|i| {
                Arc::new(PartitionLog {
                    id: i.to_string(),
                    events: Mutex::new(Vec::new()),
                    appended: Notify::new(),
                })
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                partitions,
                unassigned: Mutex::new((0..partition_count).collect()),
                store,
                closed: CancellationToken::new(),
                released: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a raw item to a partition and return its sequence number.
    pub fn publish(&self, partition: usize, body: impl Into<Vec<u8>>) -> Result<i64> {
        let log = self
            .shared
            .partitions
            .get(partition)
            .ok_or_else(|| Error::Consumer(format!("No such partition: {partition}")))?;

        let sequence = {
            let mut events = lock(&log.events);
            events.push(body.into());
            (events.len() - 1) as i64
        };
        log.appended.notify_waiters();
        Ok(sequence)
    }

    /// Number of items appended to a partition so far.
    pub fn len(&self, partition: usize) -> usize {
        self.shared
            .partitions
            .get(partition)
            .map(|log| lock(&log.events).len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, partition: usize) -> bool {
        self.len(partition) == 0
    }

    /// Stored checkpoint sequence of a partition.
    pub async fn checkpoint(&self, partition: usize) -> Result<Option<i64>> {
        let checkpoint = self
            .shared
            .store
            .read_checkpoint(&partition.to_string())
            .await
            .map_err(|e| Error::Consumer(format!("Failed to read checkpoint: {e}")))?;
        Ok(checkpoint.map(|c| c.sequence))
    }

    /// How many partition clients have been closed.
    pub fn released_partitions(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Processor for MemoryBroker {
    type Partition = MemoryPartition;

    async fn next_partition(&self) -> Option<MemoryPartition> {
        loop {
            if self.shared.closed.is_cancelled() {
                return None;
            }
            // The index is only taken once the checkpoint has been read, so a
            // dropped call leaves the partition unassigned.
            let index = *lock(&self.shared.unassigned).front()?;
            let log = Arc::clone(&self.shared.partitions[index]);

            let position = match self.shared.store.read_checkpoint(&log.id).await {
                Ok(Some(checkpoint)) => (checkpoint.sequence + 1) as usize,
                Ok(None) => 0,
                Err(e) => {
                    warn!(partition = %log.id, "Failed to read checkpoint, starting from the beginning: {e}");
                    0
                }
            };

            {
                let mut unassigned = lock(&self.shared.unassigned);
                match unassigned.iter().position(|&i| i == index) {
                    Some(slot) => {
                        unassigned.remove(slot);
                    }
                    // Taken by a concurrent call in the meantime
                    None => continue,
                }
            }
            debug!(partition = %log.id, position, "Assigning partition");

            return Some(MemoryPartition {
                log,
                position,
                shared: Arc::clone(&self.shared),
            });
        }
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.shared.closed.cancelled() => {}
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.cancel();
        Ok(())
    }
}

/// Client for one partition of a [`MemoryBroker`].
pub struct MemoryPartition {
    log: Arc<PartitionLog>,
    position: usize,
    shared: Arc<Shared>,
}

impl MemoryPartition {
    fn take(&mut self, max_count: usize) -> Vec<RawEvent> {
        let events = lock(&self.log.events);
        let end = events.len().min(self.position + max_count);
        let batch: Vec<RawEvent> = events[self.position.min(end)..end]
            .iter()
            .enumerate()
            .map(|(i, body)| RawEvent::new((self.position + i) as i64, body.clone()))
            .collect();
        self.position = end.max(self.position);
        batch
    }
}

#[async_trait]
impl PartitionClient for MemoryPartition {
    fn partition_id(&self) -> &str {
        &self.log.id
    }

    async fn receive(&mut self, max_count: usize, wait: Duration) -> Result<Vec<RawEvent>> {
        let deadline = Instant::now() + wait;
        loop {
            if self.shared.closed.is_cancelled() {
                return Err(Error::PartitionClosed {
                    partition: self.log.id.clone(),
                });
            }

            // Register interest before looking, so an append in between is not missed
            let log = Arc::clone(&self.log);
            let appended = log.appended.notified();

            let batch = self.take(max_count);
            if !batch.is_empty() {
                return Ok(batch);
            }

            tokio::select! {
                _ = appended => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                _ = self.shared.closed.cancelled() => {}
            }
        }
    }

    async fn commit(&mut self, event: &RawEvent) -> Result<()> {
        self.shared
            .store
            .store_checkpoint(&PartitionCheckpoint::new(self.log.id.clone(), event.sequence))
            .await
            .map_err(|e| Error::CheckpointFailed {
                partition: self.log.id.clone(),
                message: e.to_string(),
            })
    }

    async fn close(&mut self) {
        self.shared.released.fetch_add(1, Ordering::SeqCst);
        debug!(partition = %self.log.id, "Closing partition client");
    }
}
