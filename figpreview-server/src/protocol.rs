//! Messages exchanged with the plugin and the HTTP status envelope

use serde::{Deserialize, Serialize};

/// Payload a plugin sends once it has finished the last command
pub const IDLE_SIGNAL: &str = "idle";

/// Command pushed to every connected plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PluginCommand {
    /// Re-export assets; `force` is interpreted by the plugin only
    ScanAssets { force: bool },
    StartOfFileParsing,
    EndOfFileParsing,
    /// Contents of one localization file, path relative to the localization root
    ParseFile { path: String, data: String },
}

impl PluginCommand {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound payloads the server reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSignal {
    Idle,
}

impl PluginSignal {
    /// Exact textual match; anything else is not a signal
    pub fn parse(payload: &[u8]) -> Option<Self> {
        (payload == IDLE_SIGNAL.as_bytes()).then_some(Self::Idle)
    }
}

/// Body of every `/api`, `/upload` and `/process` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiStatus {
    Ok,
    Error { message: String },
}

impl ApiStatus {
    pub fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(e) => Self::Error {
                message: e.to_string(),
            },
        }
    }
}

/// Log-friendly preview of an inbound payload
pub fn payload_preview(payload: &[u8]) -> String {
    if payload.len() < 200 {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        format!("{}<...>", String::from_utf8_lossy(&payload[..50]))
    }
}
