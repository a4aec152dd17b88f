//! Dispatch coordinator: acquires partitions and supervises their workers.

use std::sync::Arc;
use std::time::Duration;

use eventflow_types::Message;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{PartitionClient, Processor};
use crate::error::Error;
use crate::worker::{PartitionWorker, WorkerReport, WorkerSettings};

/// Delay before the first restart of a failed partition; doubles per failure.
const INITIAL_RESTART_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(30);

pub(crate) struct DispatchCoordinator<P: Processor> {
    processor: Arc<P>,
    output: mpsc::Sender<Message>,
    cancel: CancellationToken,
    settings: WorkerSettings,
}

impl<P: Processor> DispatchCoordinator<P> {
    pub fn new(
        processor: Arc<P>,
        output: mpsc::Sender<Message>,
        cancel: CancellationToken,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            processor,
            output,
            cancel,
            settings,
        }
    }

    /// Acquire partitions until none are left or the session is cancelled,
    /// then wait for every worker to finish.
    ///
    /// Acquisition never waits on a worker, so a stuck partition does not hold
    /// up discovery of the others. A pending acquisition is kept across loop
    /// iterations and only dropped on cancellation. The coordinator's sender is
    /// dropped when this returns; the output channel closes once the last
    /// worker is done.
    pub async fn run(self) -> Vec<WorkerReport> {
        let mut workers = JoinSet::new();
        let mut reports = Vec::new();

        let processor = Arc::clone(&self.processor);
        let mut acquire = processor.next_partition();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session cancelled, no longer acquiring partitions");
                    break;
                }
                next = &mut acquire => match next {
                    Some(client) => {
                        info!(partition = %client.partition_id(), "Partition client initialized");
                        workers.spawn(supervise(
                            Arc::clone(&self.processor),
                            client,
                            self.output.clone(),
                            self.cancel.clone(),
                            self.settings,
                        ));
                        acquire = processor.next_partition();
                    }
                    None => {
                        info!("No more partition clients to process");
                        break;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    reports.extend(collect(joined));
                }
            }
        }
        drop(acquire);

        drop(self.output);
        while let Some(joined) = workers.join_next().await {
            reports.extend(collect(joined));
        }
        reports
    }
}

/// Run workers for one partition, restarting it through
/// [`Processor::reacquire`] after a failure.
async fn supervise<P: Processor>(
    processor: Arc<P>,
    mut client: P::Partition,
    output: mpsc::Sender<Message>,
    cancel: CancellationToken,
    settings: WorkerSettings,
) -> Vec<WorkerReport> {
    let mut reports = Vec::new();
    let mut backoff = INITIAL_RESTART_BACKOFF;

    loop {
        let report = PartitionWorker::new(client, output.clone(), cancel.clone(), settings)
            .run()
            .await;
        let failed = report.is_failure();
        let partition_id = report.partition_id.clone();
        reports.push(report);
        if !failed || cancel.is_cancelled() {
            return reports;
        }

        tokio::select! {
            _ = cancel.cancelled() => return reports,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_RESTART_BACKOFF);

        match processor.reacquire(&partition_id).await {
            Some(next) => {
                warn!(
                    partition = %partition_id,
                    attempt = reports.len(),
                    "Restarting partition worker after failure"
                );
                client = next;
            }
            None => {
                error!(partition = %partition_id, "Partition stopped after worker failure");
                return reports;
            }
        }
    }
}

fn collect(joined: Result<Vec<WorkerReport>, JoinError>) -> Vec<WorkerReport> {
    match joined {
        Ok(reports) => reports,
        Err(e) => {
            error!("Partition worker task aborted: {e}");
            vec![WorkerReport {
                partition_id: String::new(),
                outcome: Err(Error::Consumer(format!("Partition worker task aborted: {e}"))),
                forwarded: 0,
                decode_failures: 0,
                last_checkpoint: None,
            }]
        }
    }
}
