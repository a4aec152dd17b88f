use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as RdkafkaConsumer, ConsumerContext, Rebalance,
    StreamConsumer,
};
use rdkafka::consumer::stream_consumer::StreamPartitionQueue;
use rdkafka::message::{BorrowedMessage, Message as RdkafkaMessage};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::KafkaConfig;
use crate::broker::{PartitionClient, Processor, RawEvent};
use crate::error::{Error, Result};

/// How long to keep draining a partition queue once the first message of a
/// batch has arrived.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

const COMMITTED_TIMEOUT: Duration = Duration::from_secs(5);

struct Assignment {
    topic: String,
    partition: i32,
    revoked: CancellationToken,
}

/// Consumer context that turns group rebalances into assignments.
struct RebalanceContext {
    assignments: mpsc::UnboundedSender<Assignment>,
    owned: Mutex<HashMap<(String, i32), CancellationToken>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let mut owned = self.owned.lock().unwrap_or_else(|p| p.into_inner());
        match rebalance {
            Rebalance::Assign(tpl) => {
                for elem in tpl.elements() {
                    let key = (elem.topic().to_string(), elem.partition());
                    let revoked = CancellationToken::new();
                    if let Some(previous) = owned.insert(key.clone(), revoked.clone()) {
                        previous.cancel();
                    }
                    info!(topic = %key.0, partition = key.1, "Partition assigned");
                    let _ = self.assignments.send(Assignment {
                        topic: key.0,
                        partition: key.1,
                        revoked,
                    });
                }
            }
            Rebalance::Revoke(tpl) => {
                for elem in tpl.elements() {
                    let key = (elem.topic().to_string(), elem.partition());
                    if let Some(revoked) = owned.remove(&key) {
                        info!(topic = %key.0, partition = key.1, "Partition revoked");
                        revoked.cancel();
                    }
                }
            }
            Rebalance::Error(e) => warn!("Rebalance error: {e}"),
        }
    }
}

type GroupConsumer = StreamConsumer<RebalanceContext>;

/// Kafka consumer group member that hands out one client per assigned partition.
pub struct KafkaProcessor {
    consumer: Arc<GroupConsumer>,
    assignments: tokio::sync::Mutex<mpsc::UnboundedReceiver<Assignment>>,
    closed: CancellationToken,
    close_once: AtomicBool,
}

impl KafkaProcessor {
    /// Create the consumer and subscribe to the configured topic.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let context = RebalanceContext {
            assignments: tx,
            owned: Mutex::new(HashMap::new()),
        };

        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", &config.session_timeout_ms)
            .set("enable.partition.eof", "false")
            .create_with_context(context)
            .map_err(|e| Error::Consumer(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| Error::Consumer(format!("Failed to subscribe to topic: {e}")))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            assignments: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            close_once: AtomicBool::new(false),
        })
    }

    fn split(&self, assignment: Assignment) -> Option<KafkaPartition> {
        let Some(queue) = self
            .consumer
            .split_partition_queue(&assignment.topic, assignment.partition)
        else {
            warn!(
                topic = %assignment.topic,
                partition = assignment.partition,
                "Failed to split partition queue"
            );
            return None;
        };

        Some(KafkaPartition {
            id: format!("{}-{}", assignment.topic, assignment.partition),
            topic: assignment.topic,
            partition: assignment.partition,
            consumer: Arc::clone(&self.consumer),
            queue: Some(queue),
            revoked: assignment.revoked,
            closed: self.closed.clone(),
        })
    }
}

/// Split a `"{topic}-{partition}"` client id back into its parts.
fn parse_partition_id(id: &str) -> Option<(&str, i32)> {
    let (topic, partition) = id.rsplit_once('-')?;
    if topic.is_empty() {
        return None;
    }
    Some((topic, partition.parse().ok()?))
}

#[async_trait]
impl Processor for KafkaProcessor {
    type Partition = KafkaPartition;

    async fn next_partition(&self) -> Option<KafkaPartition> {
        let mut assignments = self.assignments.lock().await;
        loop {
            let assignment = tokio::select! {
                _ = self.closed.cancelled() => return None,
                next = assignments.recv() => next?,
            };
            if assignment.revoked.is_cancelled() {
                continue;
            }
            if let Some(partition) = self.split(assignment) {
                return Some(partition);
            }
        }
    }

    async fn reacquire(&self, partition_id: &str) -> Option<KafkaPartition> {
        if self.closed.is_cancelled() {
            return None;
        }
        let (topic, partition) = parse_partition_id(partition_id)?;
        let revoked = {
            let owned = self
                .consumer
                .context()
                .owned
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            owned
                .get(&(topic.to_string(), partition))
                .filter(|token| !token.is_cancelled())
                .cloned()?
        };

        let client = self.split(Assignment {
            topic: topic.to_string(),
            partition,
            revoked,
        })?;

        // Rewind to the last commit so items fetched by the failed worker are read again
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(topic, partition);
        match self.consumer.committed_offsets(tpl, COMMITTED_TIMEOUT) {
            Ok(committed) => match committed.find_partition(topic, partition).map(|e| e.offset()) {
                Some(offset @ Offset::Offset(_)) => {
                    if let Err(e) = self.consumer.seek(topic, partition, offset, COMMITTED_TIMEOUT) {
                        warn!(partition = %partition_id, "Failed to rewind to committed offset: {e}");
                    }
                }
                _ => debug!(partition = %partition_id, "No committed offset, resuming from current position"),
            },
            Err(e) => warn!(partition = %partition_id, "Failed to fetch committed offset: {e}"),
        }

        info!(partition = %partition_id, "Partition queue split again");
        Some(client)
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Kafka processor running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.closed.cancelled() => return Ok(()),
                received = self.consumer.recv() => match received {
                    // The main queue only sees messages for partitions that have not
                    // been split yet. Rewind so the partition queue delivers them.
                    Ok(msg) => {
                        debug!(
                            topic = msg.topic(),
                            partition = msg.partition(),
                            offset = msg.offset(),
                            "Message arrived before its partition queue, rewinding"
                        );
                        if let Err(e) = self.consumer.seek(
                            msg.topic(),
                            msg.partition(),
                            Offset::Offset(msg.offset()),
                            Duration::from_secs(1),
                        ) {
                            warn!("Failed to rewind partition {}: {e}", msg.partition());
                        }
                    }
                    Err(e) => return Err(Error::RunLoopFailed(format!("Error receiving message: {e}"))),
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.close_once.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.cancel();
        self.consumer.unsubscribe();
        info!("Kafka consumer closed");
        Ok(())
    }
}

/// Client for one assigned Kafka partition.
pub struct KafkaPartition {
    id: String,
    topic: String,
    partition: i32,
    consumer: Arc<GroupConsumer>,
    queue: Option<StreamPartitionQueue<RebalanceContext>>,
    revoked: CancellationToken,
    closed: CancellationToken,
}

impl KafkaPartition {
    fn closed_error(&self) -> Error {
        Error::PartitionClosed {
            partition: self.id.clone(),
        }
    }
}

fn to_raw_event(msg: &BorrowedMessage<'_>) -> RawEvent {
    RawEvent {
        sequence: msg.offset(),
        body: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        key: msg.key().map(<[u8]>::to_vec),
        timestamp: msg.timestamp().to_millis(),
    }
}

#[async_trait]
impl PartitionClient for KafkaPartition {
    fn partition_id(&self) -> &str {
        &self.id
    }

    async fn receive(&mut self, max_count: usize, wait: Duration) -> Result<Vec<RawEvent>> {
        if self.revoked.is_cancelled() || self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        let Some(queue) = self.queue.as_ref() else {
            return Err(self.closed_error());
        };

        let deadline = Instant::now() + wait;
        let mut events = Vec::new();

        // Wait for the first message up to the deadline, then drain briefly
        while events.len() < max_count {
            let limit = if events.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + DRAIN_TIMEOUT)
            };

            let received = tokio::select! {
                _ = self.revoked.cancelled() => break,
                _ = self.closed.cancelled() => break,
                received = tokio::time::timeout_at(limit, queue.recv()) => received,
            };
            match received {
                Ok(Ok(msg)) => events.push(to_raw_event(&msg)),
                Ok(Err(e)) => {
                    return Err(Error::ReceiveFailed {
                        partition: self.id.clone(),
                        message: e.to_string(),
                    })
                }
                Err(_) => break, // Timeout, no more messages available right now
            }
        }

        if events.is_empty() && (self.revoked.is_cancelled() || self.closed.is_cancelled()) {
            return Err(self.closed_error());
        }
        Ok(events)
    }

    async fn commit(&mut self, event: &RawEvent) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(event.sequence + 1))
            .map_err(|e| Error::CheckpointFailed {
                partition: self.id.clone(),
                message: format!("Failed to add partition offset: {e}"),
            })?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| Error::CheckpointFailed {
                partition: self.id.clone(),
                message: format!("Failed to commit offset: {e}"),
            })
    }

    async fn close(&mut self) {
        debug!(partition = %self.id, "Closing partition client");
        self.queue = None;
    }
}
