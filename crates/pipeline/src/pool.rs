//! Fixed-size pool of upload workers draining the dispatch queue.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::delivery::Delivery;

type SharedQueue = Arc<Mutex<mpsc::Receiver<PathBuf>>>;

/// Worker tasks sharing one receiver.
///
/// Each path is received by exactly one worker. A worker that already
/// holds a path finishes it even if cancellation arrives meanwhile.
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawns `count` workers (at least one) on the current runtime.
    pub fn spawn(
        count: usize,
        queue: mpsc::Receiver<PathBuf>,
        delivery: Arc<Delivery>,
        cancel: CancellationToken,
    ) -> Self {
        let queue: SharedQueue = Arc::new(Mutex::new(queue));
        let mut workers = JoinSet::new();

        for id in 0..count.max(1) {
            workers.spawn(run_worker(
                id,
                Arc::clone(&queue),
                Arc::clone(&delivery),
                cancel.clone(),
            ));
        }

        info!(workers = workers.len(), "upload workers started");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(mut self) {
        self.drain().await;
    }

    /// Waits for every worker to exit without consuming the pool.
    pub async fn drain(&mut self) {
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                if !e.is_cancelled() {
                    error!(error = %e, "upload worker panicked");
                }
            }
        }
    }

    /// Aborts workers still running; in-flight uploads are dropped.
    pub fn abort(&mut self) {
        self.workers.abort_all();
    }
}

async fn run_worker(
    id: usize,
    queue: SharedQueue,
    delivery: Arc<Delivery>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "worker waiting for files");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            path = recv(&queue) => path,
        };

        let Some(path) = next else {
            break;
        };

        debug!(worker = id, path = %path.display(), "worker picked up file");
        delivery.handle(id, path).await;
    }

    debug!(worker = id, "worker stopped");
}

async fn recv(queue: &SharedQueue) -> Option<PathBuf> {
    queue.lock().await.recv().await
}
