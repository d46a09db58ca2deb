use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use mediaconv_core::types::TaskStatus;

/// One input-file-to-output-file unit of work.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    /// Position in the original submission order.
    pub index: usize,
    pub input_path: PathBuf,
    /// Name the client uploaded the file under.
    pub original_name: String,
    pub output_path: PathBuf,
    pub args: Vec<String>,
    pub status: TaskStatus,
}

impl ConversionTask {
    /// File name of the output, as reported to clients.
    pub fn output_file_name(&self) -> String {
        self.output_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The engine could not be started at all.
    Spawn(String),
    ExitCode(i32),
    /// Killed by a signal, so no exit code.
    Signalled,
    Io(String),
    TimedOut(Duration),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start engine: {e}"),
            Self::ExitCode(code) => write!(f, "exit code {code}"),
            Self::Signalled => f.write_str("terminated by signal"),
            Self::Io(e) => write!(f, "engine i/o error: {e}"),
            Self::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
        }
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { output_file: String },
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn output_file(&self) -> Option<&str> {
        match self {
            Self::Succeeded { output_file } => Some(output_file),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed(failure) => Some(failure.to_string()),
        }
    }

    pub fn status(&self) -> TaskStatus {
        if self.is_success() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        }
    }
}
