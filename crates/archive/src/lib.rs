//! Date-partitioned archival of delivered files.
//!
//! Files are moved to `<root>/<yyyy-mm-dd>/<name>`. When the name is taken
//! a numeric suffix is inserted before the extension (`name_1.ext`,
//! `name_2.ext`, ...).

mod relocate;

pub use relocate::{Archiver, free_destination};

use std::path::PathBuf;

/// Format of the dated archive subdirectory.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors produced while archiving a file.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("not a file path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("error creating directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error moving {} to archive {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
