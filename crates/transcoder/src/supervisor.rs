//! Engine subprocess supervision.
//!
//! Each task gets one engine process, spawned without a shell. Progress from
//! the diagnostic stream and the terminal outcome are delivered through a
//! [`TaskHandle`], always ending with exactly one [`TaskEvent::Done`].

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use mediaconv_core::types::TaskStatus;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::progress::{ProgressEvent, parse_progress_line};
use crate::task::{ConversionTask, TaskFailure, TaskOutcome};

const READ_CHUNK: usize = 8 * 1024;

/// Event produced while a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Progress(ProgressEvent),
    Done(TaskOutcome),
}

/// Finite, ordered event sequence of one running task.
pub struct TaskHandle {
    events: mpsc::UnboundedReceiver<TaskEvent>,
}

impl TaskHandle {
    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Skip progress and wait for the outcome.
    pub async fn wait(mut self) -> TaskOutcome {
        while let Some(event) = self.next().await {
            if let TaskEvent::Done(outcome) = event {
                return outcome;
            }
        }
        TaskOutcome::Failed(TaskFailure::Io("supervisor stopped without an outcome".into()))
    }
}

/// Spawns and watches engine processes.
#[derive(Debug, Clone)]
pub struct JobSupervisor {
    engine_path: PathBuf,
    timeout: Option<Duration>,
}

impl JobSupervisor {
    pub fn new(engine_path: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            engine_path,
            timeout,
        }
    }

    pub fn engine_path(&self) -> &Path {
        &self.engine_path
    }

    /// Start a task in the background. Failed tasks are never retried.
    pub fn run_task(&self, task: ConversionTask) -> TaskHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = self.clone();
        tokio::spawn(async move {
            let outcome = supervisor.supervise(task, &tx).await;
            let _ = tx.send(TaskEvent::Done(outcome));
        });
        TaskHandle { events: rx }
    }

    async fn supervise(
        &self,
        mut task: ConversionTask,
        tx: &mpsc::UnboundedSender<TaskEvent>,
    ) -> TaskOutcome {
        task.status = TaskStatus::Spawning;
        info!(
            index = task.index,
            engine = %self.engine_path.display(),
            args = ?task.args,
            "spawning engine"
        );

        let mut child = match spawn_engine(&self.engine_path, &task.args) {
            Ok(child) => child,
            Err(e) => {
                task.status = TaskStatus::Failed;
                warn!(index = task.index, error = %e, "engine failed to start");
                return TaskOutcome::Failed(TaskFailure::Spawn(e.to_string()));
            }
        };
        task.status = TaskStatus::Running;

        let outcome = match self.drive(&mut child, tx).await {
            Some(Ok(status)) if status.success() => TaskOutcome::Succeeded {
                output_file: task.output_file_name(),
            },
            Some(Ok(status)) => match status.code() {
                Some(code) => TaskOutcome::Failed(TaskFailure::ExitCode(code)),
                None => TaskOutcome::Failed(TaskFailure::Signalled),
            },
            Some(Err(e)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                TaskOutcome::Failed(TaskFailure::Io(e.to_string()))
            }
            None => {
                let limit = self.timeout.unwrap_or_default();
                warn!(index = task.index, limit_secs = limit.as_secs(), "engine timed out, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                TaskOutcome::Failed(TaskFailure::TimedOut(limit))
            }
        };

        task.status = outcome.status();
        info!(
            index = task.index,
            status = %task.status,
            error = outcome.error().as_deref().unwrap_or(""),
            "engine finished"
        );
        outcome
    }

    /// Pump diagnostics until the process exits. `None` means the timeout hit.
    async fn drive(
        &self,
        child: &mut Child,
        tx: &mpsc::UnboundedSender<TaskEvent>,
    ) -> Option<std::io::Result<ExitStatus>> {
        let stderr = child.stderr.take();
        let run = async {
            if let Some(stderr) = stderr {
                pump_diagnostics(stderr, tx).await?;
            }
            child.wait().await
        };

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        }
    }
}

fn spawn_engine(engine_path: &Path, args: &[String]) -> std::io::Result<Child> {
    Command::new(engine_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

async fn pump_diagnostics(
    mut stderr: ChildStderr,
    tx: &mpsc::UnboundedSender<TaskEvent>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = stderr.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let chunk = String::from_utf8_lossy(&buf[..n]);
        debug!(chunk = %chunk, "engine output");
        if let Some(progress) = parse_progress_line(&chunk) {
            let _ = tx.send(TaskEvent::Progress(progress));
        }
    }
}
