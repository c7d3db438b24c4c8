//! Drop-directory polling and file stability tracking.
//!
//! The [`DirectoryWatcher`] lists the watch directory on a fixed interval
//! and records every regular file in a shared [`StabilityTracker`]. Once a
//! file has sat in the directory longer than the stability threshold it is
//! claimed and handed to the dispatch queue.

mod tracker;
mod watcher;

pub use tracker::{FileState, StabilityStrategy, StabilityTracker};
pub use watcher::{DirectoryWatcher, ScanReport, WatchConfig, list_files};

use std::path::PathBuf;
use std::time::Duration;

/// Default delay between directory listings.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a file must sit unchanged before it is dispatched.
pub const DEFAULT_STABILITY_THRESHOLD: Duration = Duration::from_secs(2);

/// Errors produced by the watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("error reading the directory {}: {source}", path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
