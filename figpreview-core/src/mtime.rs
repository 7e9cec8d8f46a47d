//! Modification-time cache
//!
//! Remembers the last modification timestamp seen for each localization file
//! so a re-scan only dispatches files whose contents may have changed.
//! Entries are never removed; a stale entry for a deleted file is inert.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Path → last observed modification time (nanoseconds since the Unix epoch)
#[derive(Debug, Default)]
pub struct MtimeCache {
    entries: Mutex<HashMap<PathBuf, i64>>,
}

impl MtimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<i64> {
        self.lock().get(path).copied()
    }

    /// Store `mtime` for `path` unconditionally
    pub fn record(&self, path: impl Into<PathBuf>, mtime: i64) {
        self.lock().insert(path.into(), mtime);
    }

    /// Store `mtime` if it differs from the cached value.
    ///
    /// Returns `true` when the entry was missing or different. The check and
    /// the update happen under one lock.
    pub fn update_if_changed(&self, path: &Path, mtime: i64) -> bool {
        let mut entries = self.lock();
        match entries.get(path) {
            Some(&cached) if cached == mtime => false,
            _ => {
                entries.insert(path.to_path_buf(), mtime);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, i64>> {
        // Poisoning is ignored: every write is a single insert
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Modification time of a file as signed nanoseconds since the Unix epoch
pub fn modified_nanos(metadata: &Metadata) -> std::io::Result<i64> {
    Ok(system_time_nanos(metadata.modified()?))
}

fn system_time_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_nanos() as i64,
        Err(before) => -(before.duration().as_nanos() as i64),
    }
}
