//! Turns change notifications into reconciliation attempts.

mod queue;

pub use queue::WorkQueue;

use crate::reconciler::{Action, Reconciler};
use crate::store::ObjectStore;
use crate::types::ObjectKey;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

pub struct Scheduler<S> {
    reconciler: Arc<Reconciler<S>>,
    queue: WorkQueue,
    workers: usize,
}

impl<S: ObjectStore> Scheduler<S> {
    pub fn new(reconciler: Reconciler<S>, queue: WorkQueue) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            workers: 1,
        }
    }

    /// Number of keys reconciled concurrently. Distinct keys only.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Feeds `changes` into the queue and runs workers until `cancel` fires.
    ///
    /// Attempts in flight at cancellation are abandoned at their next store
    /// call and their keys are not marked converged.
    pub async fn run(self, changes: BoxStream<'static, ObjectKey>, cancel: CancellationToken) {
        info!(workers = self.workers, "starting scheduler");
        let mut tasks = JoinSet::new();

        tasks.spawn(feed(changes, self.queue.clone(), cancel.clone()));
        for id in 0..self.workers {
            let worker = worker(self.reconciler.clone(), self.queue.clone(), cancel.clone());
            tasks.spawn(worker.instrument(tracing::info_span!("worker", id)));
        }

        cancel.cancelled().await;
        self.queue.shutdown();

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "scheduler task failed");
            }
        }
        info!("scheduler stopped");
    }
}

async fn feed(
    mut changes: BoxStream<'static, ObjectKey>,
    queue: WorkQueue,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = changes.next() => match next {
                Some(key) => {
                    debug!(%key, "change observed");
                    queue.add(key);
                }
                None => {
                    debug!("change stream ended");
                    break;
                }
            },
        }
    }
}

async fn worker<S: ObjectStore>(
    reconciler: Arc<Reconciler<S>>,
    queue: WorkQueue,
    cancel: CancellationToken,
) {
    while let Some(key) = queue.get().await {
        let attempt = reconciler.reconcile(&key, &cancel).await;
        match attempt.action {
            Action::Done => queue.forget(&key),
            Action::Requeue(delay) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
            }
            Action::Backoff => {
                let delay = queue.add_rate_limited(key.clone());
                debug!(%key, ?delay, "requeued with backoff");
            }
            Action::Stalled => {
                let delay = queue.backoff_max();
                queue.add_after(key.clone(), delay);
                debug!(%key, ?delay, "stalled, retrying at the backoff cap");
            }
            Action::Abandon => {}
        }
        queue.done(&key);
    }
}
