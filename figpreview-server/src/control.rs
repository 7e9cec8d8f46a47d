//! Control API
//!
//! Composite operations driven by the HTTP surface. Each scan pushes a
//! command to every plugin and then blocks until a plugin reports idle (or
//! the last plugin disconnects).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figpreview_core::{modified_nanos, reconcile, relative_slash_path, DataRoots, MtimeCache};
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::error::ControlError;
use crate::idle::IdleWait;
use crate::protocol::PluginCommand;
use crate::registry::ConnectionRegistry;

/// Extension of localization files pushed to the plugin
pub const LOCALIZATION_EXTENSION: &str = "json";

pub struct ControlApi {
    registry: Arc<ConnectionRegistry>,
    mtimes: Arc<MtimeCache>,
    roots: DataRoots,
    idle_timeout: Option<Duration>,
    /// Overlapping scans would share one idle rendezvous
    scan_lock: Mutex<()>,
}

impl ControlApi {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        mtimes: Arc<MtimeCache>,
        roots: DataRoots,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            mtimes,
            roots,
            idle_timeout,
            scan_lock: Mutex::new(()),
        }
    }

    /// Ask every plugin to re-export its assets and wait until one is idle
    pub async fn scan_assets(&self, force: bool) -> Result<(), ControlError> {
        let _scan = self.scan_lock.lock().await;
        tracing::info!("Requesting asset scan (force: {})", force);

        let idle = self.registry.idle().arm();
        self.send(&PluginCommand::ScanAssets { force }).await?;
        self.await_idle(idle).await
    }

    /// Push changed localization files to the plugins.
    ///
    /// With `initialize` the modification times are only recorded. Otherwise
    /// every file whose timestamp moved (or every file, with `force`) is sent
    /// as a `parseFile` command between start and end markers, and the call
    /// waits for idle. Returns the number of files dispatched.
    pub async fn scan_localization_files(
        &self,
        initialize: bool,
        force: bool,
    ) -> Result<usize, ControlError> {
        if !initialize && self.registry.is_empty().await {
            tracing::info!("No clients connected; will skip scanning for changes");
            return Ok(0);
        }

        let _scan = self.scan_lock.lock().await;
        tracing::info!("Scanning localization files for changes");

        // Armed before the walk so a plugin leaving mid-scan still releases it
        let idle = (!initialize).then(|| self.registry.idle().arm());

        self.send(&PluginCommand::StartOfFileParsing).await?;
        let walked = self.dispatch_localization_files(initialize, force).await;

        // The end marker goes out whatever happened during the walk
        let ended = self.send(&PluginCommand::EndOfFileParsing).await;
        let dispatched = walked?;
        ended?;

        if let Some(idle) = idle {
            self.await_idle(idle).await?;
        }
        tracing::info!(
            "Done scanning localization files for changes ({} dispatched)",
            dispatched
        );
        Ok(dispatched)
    }

    /// Drop every directory under the managed roots that no live asset uses.
    ///
    /// Roots are processed in order and the first failure stops the rest.
    pub async fn process_assets_change(&self, assets: &[String]) -> Result<(), ControlError> {
        tracing::info!("Processing assets change event ({} assets)", assets.len());
        let allowed = Arc::new(expand_allowed_dirs(assets));

        for root in self.roots.managed() {
            let root = root.to_path_buf();
            let allowed = allowed.clone();
            let report = tokio::task::spawn_blocking(move || reconcile(&root, &allowed)).await??;
            for dir in &report.removed {
                tracing::info!("Deleted directory {} and its contents", dir.display());
            }
        }

        tracing::info!("Done processing assets change event");
        Ok(())
    }

    async fn dispatch_localization_files(
        &self,
        initialize: bool,
        force: bool,
    ) -> Result<usize, ControlError> {
        let files = localization_files(&self.roots.localization)?;
        let mut dispatched = 0;

        for (path, mtime) in files {
            if initialize {
                self.mtimes.record(path, mtime);
                continue;
            }

            if self.mtimes.update_if_changed(&path, mtime) {
                tracing::info!("File {} has changed", path.display());
            } else if force {
                tracing::info!("File {} has changed (forced mode)", path.display());
            } else {
                continue;
            }

            self.dispatch_file(&path).await?;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    async fn dispatch_file(&self, path: &Path) -> Result<(), ControlError> {
        let rel = relative_slash_path(&self.roots.localization, path)
            .ok_or_else(|| ControlError::UnexpectedPath(path.to_path_buf()))?;
        let data = tokio::fs::read(path).await.map_err(|source| ControlError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.send(&PluginCommand::ParseFile {
            path: rel,
            data: String::from_utf8_lossy(&data).into_owned(),
        })
        .await
    }

    async fn send(&self, command: &PluginCommand) -> Result<(), ControlError> {
        let text = command.to_json()?;
        self.registry.broadcast(&text).await?;
        Ok(())
    }

    async fn await_idle(&self, idle: IdleWait) -> Result<(), ControlError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, idle.wait())
                .await
                .map_err(|_| ControlError::IdleTimeout(limit))?,
            None => idle.wait().await,
        }
        tracing::info!("Got the idle signal");
        Ok(())
    }
}

/// Localization files under `root` with their modification times, in walk order
fn localization_files(root: &Path) -> Result<Vec<(PathBuf, i64)>, ControlError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ControlError::Walk {
            root: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() || !is_localization_file(entry.path()) {
            continue;
        }
        let metadata = std::fs::metadata(entry.path()).map_err(|source| ControlError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let mtime = modified_nanos(&metadata).map_err(|source| ControlError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        files.push((entry.into_path(), mtime));
    }
    Ok(files)
}

fn is_localization_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == LOCALIZATION_EXTENSION)
}

/// Asset identifiers plus every ancestor directory of each.
///
/// `page/frame/layer` allows `page`, `page/frame` and `page/frame/layer`.
/// Empty segments are dropped, so `/page//frame/` is the same as `page/frame`.
pub fn expand_allowed_dirs(assets: &[String]) -> HashSet<String> {
    let mut allowed = HashSet::new();
    for asset in assets {
        let normalized = figpreview_core::normalize_path(asset);
        let mut prefix = String::new();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            allowed.insert(prefix.clone());
        }
    }
    allowed
}
