use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use tracing::info;

use crate::{ArchiveError, DATE_FORMAT};

/// Moves delivered files into the dated archive.
///
/// Name probing and the rename run under one lock, so concurrent workers
/// in this process never pick the same destination.
pub struct Archiver {
    root: PathBuf,
    lock: Mutex<()>,
}

impl Archiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the archive subdirectory for `date`.
    pub fn dated_dir(&self, date: NaiveDate) -> PathBuf {
        self.root.join(date.format(DATE_FORMAT).to_string())
    }

    /// Archives `path` under today's local date.
    pub fn archive(&self, path: &Path) -> Result<PathBuf, ArchiveError> {
        self.archive_on(path, Local::now().date_naive())
    }

    /// Archives `path` under `date` and returns the new location.
    ///
    /// On failure the source is left where it was.
    pub fn archive_on(&self, path: &Path, date: NaiveDate) -> Result<PathBuf, ArchiveError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| ArchiveError::InvalidPath(path.to_path_buf()))?;

        let dest_dir = self.dated_dir(date);
        ensure_archive_dir(&dest_dir)?;

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dest = free_destination(&dest_dir, Path::new(file_name));
        std::fs::rename(path, &dest).map_err(|source| ArchiveError::Rename {
            from: path.to_path_buf(),
            to: dest.clone(),
            source,
        })?;

        info!(from = %path.display(), to = %dest.display(), "file moved to archive");
        Ok(dest)
    }
}

/// Returns the first unused destination for `file_name` inside `dir`.
///
/// Tries `name.ext`, then `name_1.ext`, `name_2.ext`, ... A dangling
/// symlink counts as taken.
pub fn free_destination(dir: &Path, file_name: &Path) -> PathBuf {
    let candidate = dir.join(file_name);
    if !is_taken(&candidate) {
        return candidate;
    }

    let stem = file_name
        .file_stem()
        .unwrap_or_else(|| file_name.as_os_str());
    let extension = file_name.extension();

    let mut counter: u64 = 1;
    loop {
        let mut name = OsString::from(stem);
        name.push(format!("_{counter}"));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = dir.join(name);
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn is_taken(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Creates the archive directory (mode 755 on Unix) if absent.
fn ensure_archive_dir(path: &Path) -> Result<(), ArchiveError> {
    if path.is_dir() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }

    builder
        .create(path)
        .map_err(|source| ArchiveError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}
