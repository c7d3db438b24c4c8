use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use courier_archive::Archiver;
use courier_transfer::{TransferStats, UploadClient};
use courier_watcher::{DirectoryWatcher, StabilityStrategy, StabilityTracker, WatchConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::delivery::Delivery;
use crate::pool::WorkerPool;
use crate::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub watch: WatchConfig,
    /// Number of concurrent upload workers.
    pub workers: usize,
    /// Paths the watcher may queue ahead of the workers.
    pub queue_capacity: usize,
    pub strategy: StabilityStrategy,
}

impl PipelineConfig {
    pub fn new(watch: WatchConfig) -> Self {
        Self {
            watch,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            strategy: StabilityStrategy::default(),
        }
    }
}

/// Owns the shared state of one watch/upload/archive run.
pub struct Pipeline {
    config: PipelineConfig,
    client: UploadClient,
    archiver: Archiver,
    tracker: Arc<StabilityTracker>,
    stats: Arc<TransferStats>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, client: UploadClient, archiver: Archiver) -> Self {
        let tracker = Arc::new(StabilityTracker::new(config.strategy));
        Self {
            config,
            client,
            archiver,
            tracker,
            stats: Arc::new(TransferStats::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the pipeline when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the watcher and the worker pool on the current runtime.
    pub fn start(self) -> PipelineHandle {
        let (tx, rx) = mpsc::channel::<PathBuf>(self.config.queue_capacity.max(1));

        let watcher = DirectoryWatcher::new(
            self.config.watch.clone(),
            Arc::clone(&self.tracker),
            tx,
            self.cancel.clone(),
        );
        let watcher = tokio::spawn(watcher.run());

        let delivery = Arc::new(Delivery::new(
            self.client,
            self.archiver,
            Arc::clone(&self.tracker),
            Arc::clone(&self.stats),
        ));
        let pool = WorkerPool::spawn(
            self.config.workers,
            rx,
            delivery,
            self.cancel.clone(),
        );

        info!(
            dir = %self.config.watch.watch_dir.display(),
            workers = pool.len(),
            queue = self.config.queue_capacity.max(1),
            strategy = ?self.config.strategy,
            "pipeline started"
        );

        PipelineHandle {
            watcher,
            pool,
            cancel: self.cancel,
            stats: self.stats,
        }
    }
}

/// Running pipeline.
pub struct PipelineHandle {
    watcher: JoinHandle<()>,
    pool: WorkerPool,
    cancel: CancellationToken,
    stats: Arc<TransferStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<TransferStats> {
        Arc::clone(&self.stats)
    }

    /// Cancels the pipeline and waits up to `grace` for in-flight work.
    ///
    /// Returns `false` if tasks had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();

        let PipelineHandle {
            mut watcher,
            mut pool,
            ..
        } = self;

        let drained = tokio::time::timeout(grace, async {
            if let Err(e) = (&mut watcher).await {
                warn!(error = %e, "watcher task failed");
            }
            pool.drain().await;
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                grace_secs = grace.as_secs(),
                "shutdown grace period elapsed, aborting in-flight uploads"
            );
            watcher.abort();
            pool.abort();
        }
        drained
    }

    /// Waits for the pipeline to stop on its own or via the cancel token.
    pub async fn join(self) {
        if let Err(e) = self.watcher.await {
            warn!(error = %e, "watcher task failed");
        }
        self.pool.join().await;
    }
}
