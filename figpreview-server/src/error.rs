//! Error types for control operations and HTTP handlers

use std::path::PathBuf;
use std::time::Duration;

use axum::extract::multipart::MultipartError;
use figpreview_core::ReconcileError;

use crate::registry::BroadcastError;

/// Failure of a Control API operation
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error("Failed to encode plugin command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected file path: {0}")]
    UnexpectedPath(PathBuf),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Timed out after {0:?} waiting for the plugin to report idle")]
    IdleTimeout(Duration),
}

/// Failure of an HTTP request, reported through the status envelope
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Unsupported action")]
    UnsupportedAction,

    #[error("unsupported kind")]
    UnsupportedKind,

    #[error("Missing form field: {0}")]
    MissingField(&'static str),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Failed to read form: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Invalid asset list: {0}")]
    InvalidAssets(#[source] serde_json::Error),

    #[error("Failed to store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Control(#[from] ControlError),
}
