use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};

use crate::UploadReceipt;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Process-wide delivery counters (thread-safe).
///
/// Updated by upload workers only after the server accepted a file.
/// Updates are serialized, so counts are exact.
#[derive(Default)]
pub struct TransferStats {
    inner: Mutex<StatsSnapshot>,
}

/// Point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub files_sent: u64,
    pub bytes_sent: u64,
    pub last_file: Option<String>,
    pub last_sent_at: Option<DateTime<Local>>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted upload and returns the updated totals.
    pub fn record(&self, receipt: &UploadReceipt) -> StatsSnapshot {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.files_sent += 1;
        s.bytes_sent += receipt.bytes;
        s.last_file = Some(receipt.file_name.clone());
        s.last_sent_at = Some(Local::now());
        s.clone()
    }

    /// Returns the current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatsSnapshot {
    /// Total bytes sent, in mebibytes.
    pub fn megabytes_sent(&self) -> f64 {
        self.bytes_sent as f64 / BYTES_PER_MB
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files sent: {} | total size: {:.2} MB",
            self.files_sent,
            self.megabytes_sent()
        )?;
        if let (Some(name), Some(at)) = (&self.last_file, &self.last_sent_at) {
            write!(f, " | last file: {name} at {}", at.to_rfc3339())?;
        }
        Ok(())
    }
}
