//! Worker pool: the dispatch loop between the queue and the orchestrator.
//!
//! N independent tokio tasks each dequeue one item at a time, run the
//! handler under the per-item timeout, and route failures: retriable
//! errors go back to the queue with backoff, permanent errors and
//! exhausted budgets dead-letter the owning job.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::EngineError;
use crate::queue::{Delivery, QueueError, WorkQueue};

use super::Orchestrator;

pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` dispatch loops (at least one).
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<dyn WorkQueue>,
        workers: usize,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|index| {
                let orchestrator = orchestrator.clone();
                let queue = queue.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(run_worker(index, orchestrator, queue, shutdown_rx))
            })
            .collect();
        Self {
            shutdown_tx,
            handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Signal every worker and wait for in-flight items to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        futures::future::join_all(self.handles.drain(..)).await;
        info!("worker pool stopped");
    }
}

async fn run_worker(
    index: usize,
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn WorkQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker = index, "worker online");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            delivery = queue.dequeue() => match delivery {
                Ok(delivery) => process_delivery(&orchestrator, queue.as_ref(), delivery).await,
                Err(QueueError::Closed) => break,
                Err(err) => {
                    error!(worker = index, error = %err, "dequeue failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            },
        }
    }
    info!(worker = index, "worker stopped");
}

async fn process_delivery(
    orchestrator: &Orchestrator,
    queue: &dyn WorkQueue,
    delivery: Delivery,
) {
    let item = delivery.item.clone();
    let attempt = delivery.attempt;
    let budget = orchestrator.config().conversion_timeout();

    let outcome = match tokio::time::timeout(budget, orchestrator.handle(item.clone())).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(budget.as_secs())),
    };

    match outcome {
        Ok(()) => {}
        Err(err) if err.is_retriable() => {
            warn!(
                job_id = %item.main_id(),
                op = item.op(),
                attempt,
                error = %err,
                "handler failed; scheduling retry"
            );
            match queue.retry(delivery).await {
                Ok(()) => {}
                Err(QueueError::Exhausted(attempts)) => {
                    warn!(job_id = %item.main_id(), attempts, "retry budget exhausted");
                    orchestrator.fail_item(&item, &err).await;
                }
                Err(QueueError::Closed) => {
                    // Shutting down; leave a terminal state behind.
                    orchestrator.fail_item(&item, &err).await;
                }
            }
        }
        Err(err) => {
            orchestrator.fail_item(&item, &err).await;
        }
    }
}
