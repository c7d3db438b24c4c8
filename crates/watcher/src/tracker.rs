use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How the tracker decides that a file is no longer being written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityStrategy {
    /// Wall-clock time since the file was first listed.
    #[default]
    Elapsed,
    /// Wall-clock time since the listed size last changed.
    SizeUnchanged,
}

/// Lifecycle of a tracked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Listed, stability threshold not yet reached.
    New,
    /// Past the threshold and eligible for dispatch.
    Stable,
    /// On the dispatch queue or held by a worker.
    InFlight,
    /// Uploaded and archived.
    Done,
}

struct TrackedFile {
    stable_since: Instant,
    last_len: u64,
    state: FileState,
}

impl TrackedFile {
    fn new(now: Instant, len: u64) -> Self {
        Self {
            stable_since: now,
            last_len: len,
            state: FileState::New,
        }
    }
}

/// Per-path bookkeeping of when each file was first seen (thread-safe).
///
/// A single mutex guards the map and is held only for the duration of one
/// operation.
pub struct StabilityTracker {
    strategy: StabilityStrategy,
    files: Mutex<HashMap<PathBuf, TrackedFile>>,
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(StabilityStrategy::default())
    }
}

impl StabilityTracker {
    pub fn new(strategy: StabilityStrategy) -> Self {
        Self {
            strategy,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, TrackedFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a sighting of `path` with its listed size.
    ///
    /// Returns `true` when the path starts being tracked, including a path
    /// in [`FileState::Done`] that reappeared under the same name.
    pub fn observe(&self, path: &Path, len: u64) -> bool {
        let now = Instant::now();
        let mut files = self.lock();

        let Some(file) = files.get_mut(path) else {
            files.insert(path.to_path_buf(), TrackedFile::new(now, len));
            return true;
        };

        if file.state == FileState::Done {
            *file = TrackedFile::new(now, len);
            return true;
        }

        if self.strategy == StabilityStrategy::SizeUnchanged
            && file.last_len != len
            && file.state != FileState::InFlight
        {
            file.stable_since = now;
            file.state = FileState::New;
        }
        file.last_len = len;
        false
    }

    /// Returns `true` iff the stability clock of `path` exceeds `threshold`.
    ///
    /// A `New` path that passes is promoted to `Stable`.
    pub fn is_stable(&self, path: &Path, threshold: Duration) -> bool {
        let now = Instant::now();
        let mut files = self.lock();
        let Some(file) = files.get_mut(path) else {
            return false;
        };
        let stable = now.duration_since(file.stable_since) > threshold;
        if stable && file.state == FileState::New {
            file.state = FileState::Stable;
        }
        stable
    }

    /// Claims a `Stable` path for dispatch.
    ///
    /// Returns `false` if the path is unknown, not yet stable, already in
    /// flight or done.
    pub fn mark_in_flight(&self, path: &Path) -> bool {
        match self.lock().get_mut(path) {
            Some(file) if file.state == FileState::Stable => {
                file.state = FileState::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Returns an in-flight path to `Stable` so the next scan retries it.
    pub fn release(&self, path: &Path) {
        if let Some(file) = self.lock().get_mut(path) {
            if file.state == FileState::InFlight {
                file.state = FileState::Stable;
            }
        }
    }

    /// Marks a path as delivered.
    pub fn mark_done(&self, path: &Path) {
        if let Some(file) = self.lock().get_mut(path) {
            file.state = FileState::Done;
        }
    }

    /// Stops tracking every path not listed in `current`.
    ///
    /// Returns the evicted paths.
    pub fn evict_missing(&self, current: &HashSet<PathBuf>) -> Vec<PathBuf> {
        let mut evicted = Vec::new();
        self.lock().retain(|path, _| {
            let keep = current.contains(path);
            if !keep {
                evicted.push(path.clone());
            }
            keep
        });
        evicted.sort();
        evicted
    }

    pub fn state(&self, path: &Path) -> Option<FileState> {
        self.lock().get(path).map(|file| file.state)
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
