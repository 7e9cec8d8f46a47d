//! Server configuration
//!
//! Defines the `config.json` format and the layered lookup that applies it:
//! defaults first, then the file beside the executable, then the one in the
//! user's home directory. Each layer only overrides the keys it sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory (under the home directory) holding the per-user config file
pub const USER_CONFIG_DIR: &str = ".figma-preview-server";

/// Name of every config file layer
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Address the HTTP server binds to. `":8080"` means all interfaces.
    pub listen_address: String,

    /// Root directory for uploaded and generated data
    pub data_root: PathBuf,

    /// How long a scan waits for the plugin to report idle (0 = forever)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: ":8080".to_string(),
            data_root: PathBuf::from("./data"),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// A single config file layer; absent keys leave the current value alone
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigLayer {
    listen_address: Option<String>,
    data_root: Option<PathBuf>,
    idle_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load the default layers: `config.json` beside the executable, then
    /// `~/.figma-preview-server/config.json`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for path in default_config_paths() {
            config.apply_file(&path)?;
        }
        Ok(config)
    }

    /// Apply a config file on top of the current values.
    ///
    /// Returns `Ok(false)` when the file does not exist.
    pub fn apply_file(&mut self, path: &Path) -> Result<bool, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file {} not found", path.display());
            return Ok(false);
        }
        tracing::info!("Applying configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layer: ConfigLayer =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        self.apply_layer(layer, base_dir);
        Ok(true)
    }

    /// Apply a file that the user named explicitly; it must exist.
    pub fn apply_required_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if self.apply_file(path)? {
            Ok(())
        } else {
            Err(ConfigError::NotFound(path.to_path_buf()))
        }
    }

    fn apply_layer(&mut self, layer: ConfigLayer, base_dir: &Path) {
        if let Some(addr) = layer.listen_address {
            self.listen_address = addr;
        }
        if let Some(root) = layer.data_root {
            // Relative data roots are resolved against the file that set them
            self.data_root = if root.is_absolute() {
                root
            } else {
                clean_join(base_dir, &root)
            };
        }
        if let Some(secs) = layer.idle_timeout_secs {
            self.idle_timeout_secs = secs;
        }
    }

    /// Socket address string suitable for binding a TCP listener
    pub fn bind_address(&self) -> String {
        if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        }
    }

    /// Idle wait limit, or `None` to wait indefinitely
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Directory layout derived from the data root
    pub fn roots(&self) -> DataRoots {
        DataRoots::new(&self.data_root)
    }
}

/// Config files consulted by [`AppConfig::load`], lowest priority first
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        paths.push(dir.join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(USER_CONFIG_DIR).join(CONFIG_FILE_NAME));
    }
    paths
}

/// Join `rel` onto `base`, dropping `.` and folding `..` where possible
fn clean_join(base: &Path, rel: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in base.join(rel).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// The three directories managed beneath the data root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoots {
    pub data: PathBuf,
    pub assets: PathBuf,
    pub localization: PathBuf,
    pub preview: PathBuf,
}

impl DataRoots {
    pub fn new(data_root: &Path) -> Self {
        Self {
            data: data_root.to_path_buf(),
            assets: data_root.join("assets"),
            localization: data_root.join("localization"),
            preview: data_root.join("preview"),
        }
    }

    /// Managed roots in reconciliation order
    pub fn managed(&self) -> [&Path; 3] {
        [
            self.assets.as_path(),
            self.localization.as_path(),
            self.preview.as_path(),
        ]
    }

    /// Create every managed root that does not exist yet
    pub fn ensure_exist(&self) -> std::io::Result<()> {
        for dir in self.managed() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.listen_address, ":8080");
        assert_eq!(config.data_root, PathBuf::from("./data"));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        let applied = config.apply_file(&dir.path().join("config.json")).unwrap();
        assert!(!applied);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_required_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        let err = config
            .apply_required_file(&dir.path().join("nope.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_layer_overrides_only_present_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "listenAddress": "127.0.0.1:9000" }"#).unwrap();

        let mut config = AppConfig::default();
        assert!(config.apply_file(&path).unwrap());
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.data_root, PathBuf::from("./data"));
    }

    #[test]
    fn test_relative_data_root_resolves_against_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "dataRoot": "./store/../files" }"#).unwrap();

        let mut config = AppConfig::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.data_root, dir.path().join("files"));
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "idleTimeoutSecs": 0 }"#).unwrap();

        let mut config = AppConfig::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::default().apply_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_data_roots_layout() {
        let roots = DataRoots::new(Path::new("/srv/data"));
        assert_eq!(roots.assets, PathBuf::from("/srv/data/assets"));
        assert_eq!(roots.localization, PathBuf::from("/srv/data/localization"));
        assert_eq!(roots.preview, PathBuf::from("/srv/data/preview"));
    }

    #[test]
    fn test_ensure_exist_creates_roots() {
        let dir = TempDir::new().unwrap();
        let roots = DataRoots::new(dir.path());
        roots.ensure_exist().unwrap();
        for root in roots.managed() {
            assert!(root.is_dir());
        }
    }
}
