use crate::error::PipelineError;
use snip_core::{Repository, ShortId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One deletion request: tombstone `ids` on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTask {
    pub owner: UserId,
    pub ids: Vec<ShortId>,
}

/// A bounded queue of [`DeleteTask`]s drained by a single worker.
///
/// Tasks are applied in the order they were accepted, one at a time.
/// Backend failures are logged and the task is dropped; nothing reports
/// back to the submitter.
#[derive(Debug)]
pub struct DeletionPipeline {
    sender: mpsc::Sender<DeleteTask>,
    worker: JoinHandle<()>,
    capacity: usize,
}

impl DeletionPipeline {
    /// Creates the queue and starts the worker on the current runtime.
    ///
    /// A capacity of zero is raised to one.
    pub fn spawn(repository: Arc<dyn Repository>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(repository, receiver));
        debug!(capacity, "deletion pipeline started");

        Self {
            sender,
            worker,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a deletion, waiting for room if the queue is full.
    pub async fn enqueue(&self, owner: UserId, ids: Vec<ShortId>) -> Result<(), PipelineError> {
        if ids.is_empty() {
            return Err(PipelineError::EmptyRequest);
        }

        self.sender
            .send(DeleteTask { owner, ids })
            .await
            .map_err(|_| PipelineError::Closed)
    }

    /// Queues a deletion or fails with [`PipelineError::QueueFull`].
    pub fn try_enqueue(&self, owner: UserId, ids: Vec<ShortId>) -> Result<(), PipelineError> {
        if ids.is_empty() {
            return Err(PipelineError::EmptyRequest);
        }

        self.sender
            .try_send(DeleteTask { owner, ids })
            .map_err(|e| match e {
                TrySendError::Full(task) => {
                    debug!(owner = task.owner, ids = task.ids.len(), "deletion queue full");
                    PipelineError::QueueFull
                }
                TrySendError::Closed(_) => PipelineError::Closed,
            })
    }

    /// Stops accepting tasks and waits until every accepted task is applied.
    pub async fn shutdown(self) {
        let Self { sender, worker, .. } = self;
        drop(sender);
        if let Err(e) = worker.await {
            warn!(error = %e, "deletion worker terminated abnormally");
        }
        info!("deletion pipeline drained");
    }
}

async fn run_worker(repository: Arc<dyn Repository>, mut receiver: mpsc::Receiver<DeleteTask>) {
    while let Some(task) = receiver.recv().await {
        match repository.delete_batch(task.owner, &task.ids).await {
            Ok(()) => debug!(owner = task.owner, ids = task.ids.len(), "applied deletion"),
            Err(e) => warn!(
                owner = task.owner,
                ids = task.ids.len(),
                error = %e,
                "dropping failed deletion"
            ),
        }
    }
}
