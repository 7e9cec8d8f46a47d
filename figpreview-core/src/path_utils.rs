//! Cross-platform path utilities
//!
//! Windows paths use backslashes (`\`) while the plugin and asset identifiers
//! always use forward slashes (`/`). These helpers keep the two consistent.

use std::path::{Component, Path};

/// Normalize path to forward slashes
#[inline]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert a path to a normalized string
#[inline]
pub fn path_to_string(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// Path of `path` relative to `root`, with forward slashes.
///
/// Returns `None` when `path` does not live under `root`.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(path_to_string)
}

/// Check that an uploaded filename stays beneath the directory it is joined to.
///
/// Absolute paths, drive prefixes and `..` components are rejected; `.`
/// components are tolerated.
pub fn is_contained_relative(name: &str) -> bool {
    let normalized = normalize_path(name);
    if normalized.is_empty() || normalized.starts_with('/') {
        return false;
    }
    Path::new(&normalized)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
