//! Consumption sessions.
//!
//! [`Subscriber::subscribe`] starts the dispatch coordinator and the broker's
//! run loop side by side and returns straight away with the receiving end of
//! the output channel and a [`SessionHandle`].
//!
//! A session ends exactly once, either because the caller cancelled it or
//! because the broker's run loop failed. Failures after `subscribe` returns
//! are not reported through `subscribe`; the channel simply closes. A closed
//! channel is therefore not a success signal on its own: callers that care
//! should inspect the [`SessionReport`] returned by [`SessionHandle::shutdown`]
//! or [`SessionHandle::wait`].

use std::sync::Arc;

use eventflow_types::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::Processor;
use crate::config::SubscriberSettings;
use crate::coordinator::DispatchCoordinator;
use crate::error::{Error, Result};
use crate::worker::{WorkerReport, WorkerSettings};

/// Entry point for consuming a partitioned stream.
pub struct Subscriber<P: Processor> {
    processor: Arc<P>,
    settings: SubscriberSettings,
}

impl<P: Processor> Subscriber<P> {
    pub fn new(processor: P, settings: SubscriberSettings) -> Self {
        Self {
            processor: Arc::new(processor),
            settings,
        }
    }

    /// Start a session with its own cancellation scope.
    pub fn subscribe(&self) -> Result<(mpsc::Receiver<Message>, SessionHandle)> {
        self.subscribe_with_parent(&CancellationToken::new())
    }

    /// Start a session that is also cancelled when `parent` is.
    pub fn subscribe_with_parent(
        &self,
        parent: &CancellationToken,
    ) -> Result<(mpsc::Receiver<Message>, SessionHandle)> {
        self.settings.validate()?;

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let cancel = parent.child_token();
        let worker_settings = WorkerSettings {
            receive_wait: self.settings.receive_wait,
            max_batch: self.settings.max_batch,
        };

        let coordinator = tokio::spawn(
            DispatchCoordinator::new(
                Arc::clone(&self.processor),
                tx,
                cancel.clone(),
                worker_settings,
            )
            .run(),
        );
        let run_loop = tokio::spawn(drive_run_loop(
            Arc::clone(&self.processor),
            cancel.clone(),
        ));

        let supervisor = tokio::spawn(async move {
            let run_loop = match run_loop.await {
                Ok(result) => result,
                Err(e) => Err(Error::RunLoopFailed(format!("run loop task aborted: {e}"))),
            };
            let workers = match coordinator.await {
                Ok(reports) => reports,
                Err(e) => {
                    error!("Dispatch coordinator task aborted: {e}");
                    Vec::new()
                }
            };
            info!(workers = workers.len(), "Consumption session terminated");
            SessionReport { workers, run_loop }
        });

        Ok((rx, SessionHandle { cancel, supervisor }))
    }

    /// Release the broker consumer handle.
    pub async fn close(&self) -> Result<()> {
        info!("Stopping broker consumer");
        self.processor.close().await
    }
}

/// Run the broker loop. Whatever ends it ends the session: a failure also
/// releases the consumer handle.
async fn drive_run_loop<P: Processor>(processor: Arc<P>, cancel: CancellationToken) -> Result<()> {
    let result = processor.run(cancel.clone()).await;

    match result {
        Ok(()) => {
            if !cancel.is_cancelled() {
                info!("Broker run loop returned, ending session");
                cancel.cancel();
            }
            Ok(())
        }
        Err(e) => {
            let e = match e {
                e @ Error::RunLoopFailed(_) => e,
                other => Error::RunLoopFailed(other.to_string()),
            };
            error!("Error processor run: {e}");
            cancel.cancel();
            if let Err(close_err) = processor.close().await {
                warn!("Error closing consumer client after run loop failure: {close_err}");
            }
            Err(e)
        }
    }
}

/// Control handle for a running session.
#[derive(Debug)]
pub struct SessionHandle {
    cancel: CancellationToken,
    supervisor: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Request cancellation. Workers stop at their next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the session and wait for it to terminate.
    pub async fn shutdown(self) -> SessionReport {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the session to terminate without cancelling it.
    pub async fn wait(self) -> SessionReport {
        match self.supervisor.await {
            Ok(report) => report,
            Err(e) => SessionReport {
                workers: Vec::new(),
                run_loop: Err(Error::Consumer(format!("session supervisor aborted: {e}"))),
            },
        }
    }
}

/// Everything the session observed on its way down.
#[derive(Debug)]
pub struct SessionReport {
    /// One report per partition worker that ran
    pub workers: Vec<WorkerReport>,
    /// Outcome of the broker run loop
    pub run_loop: Result<()>,
}

impl SessionReport {
    /// True when neither the run loop nor any worker failed.
    pub fn is_clean(&self) -> bool {
        self.run_loop.is_ok() && self.workers.iter().all(|w| !w.is_failure())
    }

    /// Latest report for a partition; a restarted partition has one per run.
    pub fn worker(&self, partition_id: &str) -> Option<&WorkerReport> {
        self.workers
            .iter()
            .rev()
            .find(|w| w.partition_id == partition_id)
    }
}
