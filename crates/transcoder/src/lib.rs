#![allow(clippy::collapsible_if)]
pub mod archive;
pub mod args;
pub mod batch;
pub mod formats;
pub mod locate;
pub mod progress;
pub mod router;
pub mod service;
pub mod supervisor;
pub mod task;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to spawn engine: {0}")]
    Spawn(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("batch {0} is still running")]
    BatchNotReady(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for TranscodeError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Global transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub engine_path: PathBuf,
    pub output_dir: PathBuf,
    /// Upper bound on engine subprocesses running at once for one batch.
    pub max_concurrent: usize,
    pub task_timeout: Option<Duration>,
    /// How long a finished batch stays downloadable. `None` keeps it for the
    /// life of the process.
    pub result_ttl: Option<Duration>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from(locate::ENGINE_BINARY),
            output_dir: PathBuf::from("./public/output"),
            max_concurrent: 1,
            task_timeout: None,
            result_ttl: Some(DEFAULT_RESULT_TTL),
        }
    }
}
