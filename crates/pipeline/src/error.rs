//! Delivery error types.

use courier_archive::ArchiveError;
use courier_transfer::UploadError;

/// Errors produced while delivering one file.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("error sending the file: {0}")]
    Upload(#[from] UploadError),

    /// The server has the file but it is still in the watch directory.
    #[error("file sent but not archived: {0}")]
    Archive(#[from] ArchiveError),

    /// The blocking archive task panicked or was cancelled.
    #[error("file sent but archive task failed: {0}")]
    ArchiveTask(#[from] tokio::task::JoinError),
}

impl DeliveryError {
    /// Returns `true` if the server already accepted the file.
    pub fn after_upload(&self) -> bool {
        matches!(self, DeliveryError::Archive(_) | DeliveryError::ArchiveTask(_))
    }
}
