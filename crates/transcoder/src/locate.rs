//! Engine binary resolution.
//!
//! Resolved once at startup: a configured override wins if it exists on disk,
//! then a PATH lookup, then the bare command name for the OS loader to find.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Canonical engine command name.
pub const ENGINE_BINARY: &str = "ffmpeg";

/// Flat key-value configuration record read at startup.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub ffmpeg_path: Option<PathBuf>,
}

impl EngineSettings {
    /// Read the configuration record. Missing or malformed files yield `None`.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(config = %path.display(), error = %e, "could not read config file");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(config = %path.display(), error = %e, "could not parse config file");
                None
            }
        }
    }
}

/// Resolve the engine path for this process.
pub fn resolve_engine_path(config_path: &Path) -> PathBuf {
    resolve_binary(config_path, ENGINE_BINARY)
}

fn resolve_binary(config_path: &Path, binary: &str) -> PathBuf {
    if let Some(configured) = EngineSettings::load(config_path).and_then(|s| s.ffmpeg_path) {
        if configured.exists() {
            info!(path = %configured.display(), "using engine from config file");
            return configured;
        }
        warn!(path = %configured.display(), "configured engine path does not exist, ignoring");
    }

    match which::which(binary) {
        Ok(found) => {
            info!(path = %found.display(), "auto-detected engine path");
            found
        }
        Err(e) => {
            info!(error = %e, binary, "could not detect engine path, falling back to bare name");
            PathBuf::from(binary)
        }
    }
}
