//! Figma Preview Core Library
//!
//! Synchronous building blocks shared by the preview server and CLI:
//! - Server configuration and data-root layout
//! - Path normalization between OS paths and slash-separated identifiers
//! - Modification-time cache for localization files
//! - Directory reconciliation against a set of referenced assets

pub mod config;
pub mod mtime;
pub mod path_utils;
pub mod reconcile;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, DataRoots};
pub use mtime::{modified_nanos, MtimeCache};
pub use path_utils::{is_contained_relative, normalize_path, path_to_string, relative_slash_path};
pub use reconcile::{reconcile, ReconcileError, ReconcileReport};
