//! Multipart HTTP upload client with transfer statistics.
//!
//! Each file is sent as a single `POST` whose `multipart/form-data` body
//! carries one part named [`FORM_FIELD`]. Requests authenticate with HTTP
//! Basic credentials and validate the server certificate when the endpoint
//! is `https`.

mod client;
mod error;
mod stats;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClientConfig, FORM_FIELD, UploadClient, UploadReceipt};
pub use error::UploadError;
pub use stats::{StatsSnapshot, TransferStats};

use std::time::Duration;

/// Default ceiling for a single upload request.
///
/// Keeps an unreachable server from occupying a worker indefinitely.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
