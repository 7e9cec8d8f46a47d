//! Directory reconciliation
//!
//! Removes every directory beneath a root whose relative path is not in an
//! allow-list. The allow-list must already be closed over ancestors: if
//! `a/b/c` is allowed then so are `a` and `a/b`, otherwise the parents would
//! be removed together with the allowed child.
//!
//! The tree is walked to completion first and only then acted on, so
//! deletions never disturb the enumeration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::path_utils::relative_slash_path;

/// Errors raised during reconciliation. Any error aborts the whole root.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to delete directory {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of reconciling one root
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Directories removed, each together with its subtree
    pub removed: Vec<PathBuf>,
    /// Directories that matched the allow-list
    pub kept: usize,
}

/// Delete every directory under `root` whose slash-separated relative path is
/// not in `allowed`. The root itself is never touched.
pub fn reconcile(root: &Path, allowed: &HashSet<String>) -> Result<ReconcileReport, ReconcileError> {
    let existing = collect_dirs(root)?;
    let mut report = ReconcileReport::default();

    for (dir, rel) in existing {
        // Already gone with a removed ancestor
        if report.removed.iter().any(|gone| dir.starts_with(gone)) {
            continue;
        }

        if allowed.contains(&rel) {
            report.kept += 1;
            continue;
        }

        std::fs::remove_dir_all(&dir).map_err(|source| ReconcileError::Remove {
            path: dir.clone(),
            source,
        })?;
        report.removed.push(dir);
    }

    Ok(report)
}

/// Every directory below `root` in parent-before-child order, paired with its
/// relative path
fn collect_dirs(root: &Path) -> Result<Vec<(PathBuf, String)>, ReconcileError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ReconcileError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(rel) = relative_slash_path(root, entry.path()) {
            dirs.push((entry.into_path(), rel));
        }
    }
    Ok(dirs)
}
