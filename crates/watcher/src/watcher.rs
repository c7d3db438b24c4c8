//! Polling directory watcher.
//!
//! Lists the watch directory every poll interval, feeds the
//! [`StabilityTracker`] and pushes stable files onto the dispatch queue.
//! Sending blocks while the queue is full, which throttles scanning to the
//! pace of the upload workers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tracker::{FileState, StabilityTracker};
use crate::{DEFAULT_POLL_INTERVAL, DEFAULT_STABILITY_THRESHOLD, WatchError};

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory to monitor (not recursive).
    pub watch_dir: PathBuf,
    /// Delay between listings.
    pub poll_interval: Duration,
    /// Minimum time a file must sit unchanged before dispatch.
    pub stability_threshold: Duration,
}

impl WatchConfig {
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
        }
    }
}

/// Counters for a single scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files seen this cycle.
    pub listed: usize,
    /// Files tracked for the first time.
    pub detected: usize,
    /// Files pushed onto the queue.
    pub dispatched: usize,
    /// Paths dropped from tracking.
    pub evicted: usize,
    /// The scan was cut short by cancellation or a closed queue.
    pub stopped: bool,
}

/// Producer side of the dispatch queue.
pub struct DirectoryWatcher {
    config: WatchConfig,
    tracker: Arc<StabilityTracker>,
    queue: mpsc::Sender<PathBuf>,
    cancel: CancellationToken,
}

impl DirectoryWatcher {
    pub fn new(
        config: WatchConfig,
        tracker: Arc<StabilityTracker>,
        queue: mpsc::Sender<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            tracker,
            queue,
            cancel,
        }
    }

    /// Runs scan cycles until cancelled or the queue is closed.
    ///
    /// Listing failures are logged and retried on the next tick. The queue
    /// sender is dropped on return.
    pub async fn run(self) {
        info!(dir = %self.config.watch_dir.display(), "start monitoring folder");

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.scan_once().await {
                Ok(report) if report.stopped => break,
                Ok(report) => {
                    debug!(
                        listed = report.listed,
                        dispatched = report.dispatched,
                        evicted = report.evicted,
                        "scan complete"
                    );
                }
                Err(e) => warn!(error = %e, "directory scan failed, retrying"),
            }
        }

        info!(dir = %self.config.watch_dir.display(), "stopped monitoring folder");
    }

    /// Performs one listing, dispatch and eviction pass.
    pub async fn scan_once(&self) -> Result<ScanReport, WatchError> {
        let files = list_files(&self.config.watch_dir).await?;
        let mut report = ScanReport {
            listed: files.len(),
            ..ScanReport::default()
        };
        let mut seen = HashSet::with_capacity(files.len());

        for (path, len) in files {
            if !self.track(&path, len, &mut report).await {
                return Ok(report);
            }
            seen.insert(path);
        }

        for path in self.tracker.evict_missing(&seen) {
            info!(path = %path.display(), "file removed from tracking");
            report.evicted += 1;
        }

        Ok(report)
    }

    /// Feeds one listed file to the tracker and dispatches it once stable.
    ///
    /// A path already `Done` whose file is gone was listed just before a
    /// worker archived it; it is ignored and evicted by the caller. Returns
    /// `false` once the scan has to stop.
    async fn track(&self, path: &Path, len: u64, report: &mut ScanReport) -> bool {
        if self.tracker.state(path) == Some(FileState::Done)
            && !tokio::fs::try_exists(path).await.unwrap_or(false)
        {
            debug!(path = %path.display(), "ignoring stale listing of delivered file");
            return true;
        }

        if self.tracker.observe(path, len) {
            info!(path = %path.display(), bytes = len, "new file detected");
            report.detected += 1;
        }

        if self.tracker.is_stable(path, self.config.stability_threshold)
            && self.tracker.mark_in_flight(path)
        {
            info!(
                path = %path.display(),
                threshold_ms = self.config.stability_threshold.as_millis() as u64,
                "file unchanged past threshold, dispatching"
            );
            if !self.dispatch(path.to_path_buf()).await {
                self.tracker.release(path);
                report.stopped = true;
                return false;
            }
            report.dispatched += 1;
        } else if self.tracker.state(path) == Some(FileState::New) {
            debug!(path = %path.display(), "file not ready for sending yet");
        }
        true
    }

    /// Sends `path` to the workers, waiting for queue capacity.
    ///
    /// Returns `false` if cancelled while waiting or the queue is closed.
    async fn dispatch(&self, path: PathBuf) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.queue.send(path) => sent.is_ok(),
        }
    }
}

/// Lists regular files in `dir` with their sizes, sorted by path.
///
/// Symlinks are followed; directories and entries that vanish mid-listing
/// are skipped.
pub async fn list_files(dir: &Path) -> Result<Vec<(PathBuf, u64)>, WatchError> {
    let listing = |source: std::io::Error| WatchError::Listing {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(listing)?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(listing)? {
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => files.push((path, metadata.len())),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable entry"),
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StabilityStrategy;

    const SETTLE: Duration = Duration::from_millis(30);

    struct Fixture {
        _dir: tempfile::TempDir,
        watch_dir: PathBuf,
        tracker: Arc<StabilityTracker>,
        rx: mpsc::Receiver<PathBuf>,
        cancel: CancellationToken,
        watcher: DirectoryWatcher,
    }

    fn fixture(threshold: Duration, capacity: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let watch_dir = dir.path().to_path_buf();
        let tracker = Arc::new(StabilityTracker::new(StabilityStrategy::Elapsed));
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let config = WatchConfig {
            watch_dir: watch_dir.clone(),
            poll_interval: Duration::from_millis(20),
            stability_threshold: threshold,
        };
        let watcher = DirectoryWatcher::new(config, Arc::clone(&tracker), tx, cancel.clone());
        Fixture {
            _dir: dir,
            watch_dir,
            tracker,
            rx,
            cancel,
            watcher,
        }
    }

    #[tokio::test]
    async fn list_files_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let files = list_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![(dir.path().join("a.txt"), 1), (dir.path().join("b.txt"), 2)]
        );
    }

    #[tokio::test]
    async fn list_files_missing_dir_is_listing_error() {
        let err = list_files(Path::new("/nonexistent/drop/dir")).await.unwrap_err();
        assert!(matches!(err, WatchError::Listing { .. }));
    }

    #[tokio::test]
    async fn stable_file_dispatched_once() {
        let mut f = fixture(Duration::from_millis(10), 8);
        let file = f.watch_dir.join("a.txt");
        std::fs::write(&file, b"0123456789").unwrap();

        let first = f.watcher.scan_once().await.unwrap();
        assert_eq!(first.detected, 1);
        assert_eq!(first.dispatched, 0);

        tokio::time::sleep(SETTLE).await;
        let second = f.watcher.scan_once().await.unwrap();
        assert_eq!(second.dispatched, 1);
        assert_eq!(f.rx.try_recv().unwrap(), file);

        // In flight: later scans leave it alone.
        tokio::time::sleep(SETTLE).await;
        let third = f.watcher.scan_once().await.unwrap();
        assert_eq!(third.dispatched, 0);
        assert!(f.rx.try_recv().is_err());
        assert_eq!(f.tracker.state(&file), Some(FileState::InFlight));
    }

    #[tokio::test]
    async fn released_file_is_redispatched() {
        let mut f = fixture(Duration::from_millis(10), 8);
        let file = f.watch_dir.join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        f.watcher.scan_once().await.unwrap();
        tokio::time::sleep(SETTLE).await;
        f.watcher.scan_once().await.unwrap();
        assert_eq!(f.rx.try_recv().unwrap(), file);

        // Upload failed: the worker releases the path.
        f.tracker.release(&file);
        let report = f.watcher.scan_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(f.rx.try_recv().unwrap(), file);
    }

    #[tokio::test]
    async fn file_removed_before_threshold_is_forgotten() {
        let mut f = fixture(Duration::from_secs(60), 8);
        let file = f.watch_dir.join("a.txt");
        std::fs::write(&file, b"partial").unwrap();

        f.watcher.scan_once().await.unwrap();
        assert_eq!(f.tracker.len(), 1);

        std::fs::remove_file(&file).unwrap();
        let report = f.watcher.scan_once().await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(f.tracker.is_empty());
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivered_file_in_stale_listing_is_not_redetected() {
        let f = fixture(Duration::from_millis(10), 8);
        let file = f.watch_dir.join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        f.watcher.scan_once().await.unwrap();
        tokio::time::sleep(SETTLE).await;
        f.watcher.scan_once().await.unwrap();
        assert_eq!(f.tracker.state(&file), Some(FileState::InFlight));

        // A worker archives the file right after the next listing was taken.
        std::fs::remove_file(&file).unwrap();
        f.tracker.mark_done(&file);

        let mut report = ScanReport::default();
        assert!(f.watcher.track(&file, 1, &mut report).await);
        assert_eq!(report.detected, 0);
        assert_eq!(f.tracker.state(&file), Some(FileState::Done));

        let next = f.watcher.scan_once().await.unwrap();
        assert_eq!(next.evicted, 1);
        assert!(f.tracker.is_empty());
    }

    #[tokio::test]
    async fn delivered_name_reused_by_new_file_is_tracked_again() {
        let f = fixture(Duration::from_millis(10), 8);
        let file = f.watch_dir.join("a.txt");
        std::fs::write(&file, b"first").unwrap();
        f.tracker.observe(&file, 5);
        tokio::time::sleep(SETTLE).await;
        assert!(f.tracker.is_stable(&file, Duration::from_millis(1)));
        assert!(f.tracker.mark_in_flight(&file));
        f.tracker.mark_done(&file);

        // Same name, new content, still on disk.
        std::fs::write(&file, b"second!").unwrap();
        let report = f.watcher.scan_once().await.unwrap();
        assert_eq!(report.detected, 1);
        assert_eq!(f.tracker.state(&file), Some(FileState::New));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let f = fixture(Duration::from_secs(60), 8);
        let cancel = f.cancel.clone();
        let task = tokio::spawn(f.watcher.run());

        tokio::time::sleep(SETTLE).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn run_survives_missing_directory() {
        let f = fixture(Duration::from_millis(10), 8);
        let watch_dir = f.watch_dir.clone();
        std::fs::remove_dir(&watch_dir).unwrap();

        let cancel = f.cancel.clone();
        let mut rx = f.rx;
        let task = tokio::spawn(f.watcher.run());

        // Listing fails for a while, then the directory comes back.
        tokio::time::sleep(Duration::from_millis(60)).await;
        std::fs::create_dir(&watch_dir).unwrap();
        std::fs::write(watch_dir.join("late.txt"), b"late").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("file was never dispatched");
        assert_eq!(got, Some(watch_dir.join("late.txt")));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let f = fixture(Duration::from_millis(10), 1);
        let a = f.watch_dir.join("a.txt");
        let b = f.watch_dir.join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let cancel = f.cancel.clone();
        let tracker = Arc::clone(&f.tracker);
        let mut rx = f.rx;
        let task = tokio::spawn(f.watcher.run());

        // `a` fills the queue; the watcher then blocks sending `b`.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(tracker.state(&b), Some(FileState::InFlight));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher stuck on full queue")
            .unwrap();

        // The blocked claim was handed back for the next run.
        assert_eq!(tracker.state(&b), Some(FileState::Stable));
        assert_eq!(rx.recv().await, Some(a));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn run_stops_when_queue_closed() {
        let f = fixture(Duration::from_millis(10), 1);
        std::fs::write(f.watch_dir.join("a.txt"), b"a").unwrap();
        drop(f.rx);

        let task = tokio::spawn(f.watcher.run());
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher kept running without consumers")
            .unwrap();
    }
}
