//! Partition worker: the receive, decode, forward, checkpoint loop for one
//! partition.
//!
//! Items are forwarded in receive order. After a batch has been fully handed to
//! the output channel, its last item is committed, whether or not that item
//! decoded. An item that was not forwarded (the session was cancelled or the
//! reader went away while the worker waited for channel capacity) is never
//! committed.

use std::time::Duration;

use eventflow_types::{new_operation_id, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{PartitionClient, RawEvent};
use crate::error::Error;

/// Why a worker stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The session was cancelled
    Cancelled,
    /// The broker revoked the partition or stopped
    PartitionClosed,
    /// The output channel's reader was dropped
    OutputClosed,
}

/// Final state of a worker, collected by the coordinator.
#[derive(Debug)]
pub struct WorkerReport {
    pub partition_id: String,
    pub outcome: Result<WorkerExit, Error>,
    /// Messages handed to the output channel, placeholders included
    pub forwarded: u64,
    /// Items that failed to decode
    pub decode_failures: u64,
    /// Sequence of the last committed item
    pub last_checkpoint: Option<i64>,
}

impl WorkerReport {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub receive_wait: Duration,
    pub max_batch: usize,
}

pub(crate) struct PartitionWorker<C: PartitionClient> {
    client: C,
    output: mpsc::Sender<Message>,
    cancel: CancellationToken,
    settings: WorkerSettings,
    forwarded: u64,
    decode_failures: u64,
    last_checkpoint: Option<i64>,
}

impl<C: PartitionClient> PartitionWorker<C> {
    pub fn new(
        client: C,
        output: mpsc::Sender<Message>,
        cancel: CancellationToken,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            client,
            output,
            cancel,
            settings,
            forwarded: 0,
            decode_failures: 0,
            last_checkpoint: None,
        }
    }

    /// Run until cancellation, partition close, or a fatal error.
    ///
    /// The partition client is closed on every exit path.
    pub async fn run(mut self) -> WorkerReport {
        let partition_id = self.client.partition_id().to_string();
        info!(partition = %partition_id, "Partition worker started");

        let outcome = self.process(&partition_id).await;

        self.client.close().await;
        match &outcome {
            Ok(exit) => info!(
                partition = %partition_id,
                forwarded = self.forwarded,
                "Partition worker stopped: {exit:?}"
            ),
            Err(e) => error!(
                partition = %partition_id,
                forwarded = self.forwarded,
                "Partition worker failed: {e}"
            ),
        }

        WorkerReport {
            partition_id,
            outcome,
            forwarded: self.forwarded,
            decode_failures: self.decode_failures,
            last_checkpoint: self.last_checkpoint,
        }
    }

    async fn process(&mut self, partition_id: &str) -> Result<WorkerExit, Error> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(WorkerExit::Cancelled);
            }

            let batch = match self
                .client
                .receive(self.settings.max_batch, self.settings.receive_wait)
                .await
            {
                Ok(batch) => batch,
                Err(Error::PartitionClosed { .. }) => return Ok(WorkerExit::PartitionClosed),
                Err(e) => {
                    return Err(match e {
                        e @ Error::ReceiveFailed { .. } => e,
                        other => Error::ReceiveFailed {
                            partition: partition_id.to_string(),
                            message: other.to_string(),
                        },
                    })
                }
            };

            let Some(last) = batch.last() else {
                trace!(partition = %partition_id, "No events received, polling again");
                continue;
            };

            debug!(partition = %partition_id, "Processing {} event(s)", batch.len());

            for event in &batch {
                let message = self.decode(partition_id, event);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(WorkerExit::Cancelled),
                    sent = self.output.send(message) => {
                        if sent.is_err() {
                            return Ok(WorkerExit::OutputClosed);
                        }
                        self.forwarded += 1;
                    }
                }
            }

            if let Err(e) = self.client.commit(last).await {
                warn!(
                    partition = %partition_id,
                    sequence = last.sequence,
                    "Error updating checkpoint: {e}"
                );
                return Err(match e {
                    e @ Error::CheckpointFailed { .. } => e,
                    other => Error::CheckpointFailed {
                        partition: partition_id.to_string(),
                        message: other.to_string(),
                    },
                });
            }
            self.last_checkpoint = Some(last.sequence);
        }
    }

    fn decode(&mut self, partition_id: &str, event: &RawEvent) -> Message {
        match Message::deserialize(&event.body) {
            Ok(mut message) => {
                if message.operation_id().is_empty() {
                    message.set_operation_id(new_operation_id());
                }
                debug!(
                    partition = %partition_id,
                    sequence = event.sequence,
                    operation_id = %message.operation_id(),
                    "Message received"
                );
                message
            }
            Err(e) => {
                self.decode_failures += 1;
                let operation_id = new_operation_id();
                warn!(
                    partition = %partition_id,
                    sequence = event.sequence,
                    operation_id = %operation_id,
                    "Error unmarshalling event body: {e}"
                );
                Message::decode_failure(operation_id, &e)
            }
        }
    }
}
