//! Per-file delivery: upload, record, archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_archive::Archiver;
use courier_transfer::{TransferStats, UploadClient};
use courier_watcher::StabilityTracker;
use tracing::{error, info, warn};

use crate::error::DeliveryError;

/// Drives one dispatched path through upload and archival.
///
/// Shared by all workers; every collaborator is safe for concurrent use.
pub struct Delivery {
    client: UploadClient,
    archiver: Arc<Archiver>,
    tracker: Arc<StabilityTracker>,
    stats: Arc<TransferStats>,
}

impl Delivery {
    pub fn new(
        client: UploadClient,
        archiver: Archiver,
        tracker: Arc<StabilityTracker>,
        stats: Arc<TransferStats>,
    ) -> Self {
        Self {
            client,
            archiver: Arc::new(archiver),
            tracker,
            stats,
        }
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Uploads `path`, records the transfer and archives the file.
    ///
    /// Stats are only touched after the server accepted the upload. The
    /// archive move runs on the blocking pool.
    pub async fn deliver(&self, path: &Path) -> Result<PathBuf, DeliveryError> {
        let receipt = self.client.upload(path).await?;

        let totals = self.stats.record(&receipt);
        info!(
            file = %receipt.file_name,
            files_sent = totals.files_sent,
            total_mb = format_args!("{:.2}", totals.megabytes_sent()),
            "file successfully sent"
        );

        let archiver = Arc::clone(&self.archiver);
        let source = path.to_path_buf();
        let archived = tokio::task::spawn_blocking(move || archiver.archive(&source)).await??;
        Ok(archived)
    }

    /// Delivers `path` and updates its tracker state.
    ///
    /// Errors are logged here and never propagate to the worker.
    pub async fn handle(&self, worker: usize, path: PathBuf) {
        match self.deliver(&path).await {
            Ok(archived) => {
                self.tracker.mark_done(&path);
                info!(
                    worker,
                    path = %path.display(),
                    archived = %archived.display(),
                    "delivery complete"
                );
            }
            Err(DeliveryError::Upload(e)) if !e.is_retryable() => {
                // Retrying cannot help; a file reappearing under this name
                // is tracked afresh.
                self.tracker.mark_done(&path);
                warn!(worker, path = %path.display(), error = %e, "skipping file");
            }
            Err(e) if e.after_upload() => {
                self.tracker.release(&path);
                error!(
                    worker,
                    path = %path.display(),
                    error = %e,
                    "file left in watch directory after upload; it will be sent again"
                );
            }
            Err(e) => {
                self.tracker.release(&path);
                error!(worker, path = %path.display(), error = %e, "file transfer failed, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_transfer::testing::TestReceiver;
    use courier_transfer::{ClientConfig, FORM_FIELD, UploadError};
    use courier_watcher::FileState;

    struct Fixture {
        _tmp: tempfile::TempDir,
        send: PathBuf,
        archive: PathBuf,
        tracker: Arc<StabilityTracker>,
        delivery: Delivery,
    }

    fn fixture(receiver: &TestReceiver) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let send = tmp.path().join("send");
        let archive = tmp.path().join("archive");
        std::fs::create_dir(&send).unwrap();

        let client = UploadClient::new(ClientConfig::new(receiver.url(), "admin", "pw")).unwrap();
        let tracker = Arc::new(StabilityTracker::default());
        let delivery = Delivery::new(
            client,
            Archiver::new(&archive),
            Arc::clone(&tracker),
            Arc::new(TransferStats::new()),
        );
        Fixture {
            _tmp: tmp,
            send,
            archive,
            tracker,
            delivery,
        }
    }

    /// Puts `path` into the in-flight state the watcher leaves it in.
    fn claim(tracker: &StabilityTracker, path: &Path) {
        tracker.observe(path, 0);
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.is_stable(path, Duration::from_millis(1)));
        assert!(tracker.mark_in_flight(path));
    }

    fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    #[tokio::test]
    async fn deliver_uploads_then_archives() {
        let receiver = TestReceiver::start(200).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"0123456789").unwrap();

        let archived = f.delivery.deliver(&src).await.unwrap();

        assert_eq!(archived, f.archive.join(today()).join("a.txt"));
        assert!(!src.exists());
        assert_eq!(std::fs::read(&archived).unwrap(), b"0123456789");

        let stats = f.delivery.stats().snapshot();
        assert_eq!(stats.files_sent, 1);
        assert_eq!(stats.bytes_sent, 10);
        assert_eq!(stats.last_file.as_deref(), Some("a.txt"));

        let part = receiver.requests()[0].form_file(FORM_FIELD).unwrap();
        assert_eq!(part.data, b"0123456789");
    }

    #[tokio::test]
    async fn rejected_upload_is_not_archived() {
        let receiver = TestReceiver::start(500).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"keep me").unwrap();

        let err = f.delivery.deliver(&src).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Upload(UploadError::ServerRejected { status: 500, .. })
        ));
        assert!(src.exists());
        assert!(!f.archive.exists());
        assert_eq!(f.delivery.stats().snapshot().files_sent, 0);
    }

    #[tokio::test]
    async fn handle_marks_success_done() {
        let receiver = TestReceiver::start(200).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        claim(&f.tracker, &src);

        f.delivery.handle(0, src.clone()).await;
        assert_eq!(f.tracker.state(&src), Some(FileState::Done));
    }

    #[tokio::test]
    async fn handle_releases_failure_for_retry() {
        let receiver = TestReceiver::start(503).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        claim(&f.tracker, &src);

        f.delivery.handle(3, src.clone()).await;
        assert_eq!(f.tracker.state(&src), Some(FileState::Stable));
        assert!(src.exists());

        // The server recovers; the retried path now goes through.
        receiver.set_status(200);
        assert!(f.tracker.mark_in_flight(&src));
        f.delivery.handle(3, src.clone()).await;
        assert_eq!(f.tracker.state(&src), Some(FileState::Done));
        assert_eq!(receiver.requests().len(), 2);
    }

    #[tokio::test]
    async fn handle_tolerates_vanished_file() {
        let receiver = TestReceiver::start(200).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("gone.txt");
        std::fs::write(&src, b"x").unwrap();
        claim(&f.tracker, &src);
        std::fs::remove_file(&src).unwrap();

        f.delivery.handle(1, src.clone()).await;
        // Not retried: the path is settled until it disappears from a scan.
        assert_eq!(f.tracker.state(&src), Some(FileState::Done));
        assert!(!f.tracker.mark_in_flight(&src));
        assert!(receiver.requests().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn archive_runs_off_the_worker_thread() {
        let receiver = TestReceiver::start(200).await.unwrap();
        let f = fixture(&receiver);
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"abc").unwrap();

        // A second task must still make progress on the single runtime thread
        // while the file is delivered.
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            true
        });
        let archived = f.delivery.deliver(&src).await.unwrap();

        assert!(ticker.await.unwrap());
        assert_eq!(std::fs::read(&archived).unwrap(), b"abc");
        assert!(!src.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn archive_failure_releases_after_upload() {
        let receiver = TestReceiver::start(200).await.unwrap();
        let f = fixture(&receiver);
        // Block the archive root with a regular file.
        std::fs::write(&f.archive, b"").unwrap();
        let src = f.send.join("a.txt");
        std::fs::write(&src, b"x").unwrap();
        claim(&f.tracker, &src);

        let err = f.delivery.deliver(&src).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Archive(_)));
        assert!(err.after_upload());
        assert!(src.exists());
        // The server already has it.
        assert_eq!(f.delivery.stats().snapshot().files_sent, 1);

        f.delivery.handle(0, src.clone()).await;
        assert_eq!(f.tracker.state(&src), Some(FileState::Stable));
    }
}
