//! Upload error types.

use std::path::PathBuf;

/// Errors produced while uploading a single file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file does not exist: {}", .0.display())]
    FileGone(PathBuf),

    #[error("invalid upload path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("error sending the request: {0}")]
    Transport(reqwest::Error),

    #[error("server rejected upload: {status} - {body}")]
    ServerRejected { status: u16, body: String },

    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(reqwest::Error),
}

impl UploadError {
    /// Returns `true` if a later attempt on the same file may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            UploadError::FileGone(_) | UploadError::InvalidPath(_) | UploadError::Config(_)
        )
    }
}
