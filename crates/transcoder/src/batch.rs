//! Multi-file batches.
//!
//! Tasks run through a bounded window (one at a time by default). Outcomes
//! come back in submission order whatever the window size, and a failed task
//! never stops the ones after it.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::info;

use crate::router::{SessionEvent, SessionEventRouter};
use crate::supervisor::{JobSupervisor, TaskEvent};
use crate::task::{ConversionTask, TaskFailure, TaskOutcome};

/// Outcome of one file of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub success: bool,
    pub output_file: Option<String>,
    pub original_file: String,
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn from_outcome(original_file: String, outcome: &TaskOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            output_file: outcome.output_file().map(str::to_string),
            original_file,
            error: outcome.error(),
        }
    }
}

/// Per-file outcomes, index-aligned with submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchResult {
    entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.entries.iter().filter(|e| e.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
}

impl From<Vec<BatchEntry>> for BatchResult {
    fn from(entries: Vec<BatchEntry>) -> Self {
        Self { entries }
    }
}

/// Task progress enriched with its place in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub current_file_index: usize,
    /// 1-based position, for display.
    pub current_file: usize,
    pub total_files: usize,
    pub file_name: String,
    pub speed: String,
    pub elapsed_time: String,
}

pub struct BatchCoordinator {
    supervisor: JobSupervisor,
    router: Arc<SessionEventRouter>,
    max_concurrent: usize,
}

impl BatchCoordinator {
    pub fn new(
        supervisor: JobSupervisor,
        router: Arc<SessionEventRouter>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            supervisor,
            router,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run the tasks, yielding one entry per task in submission order.
    /// Progress goes out on the session's `batch-progress` topic as it happens.
    pub fn run_batch(
        &self,
        session_id: &str,
        tasks: Vec<ConversionTask>,
    ) -> impl Stream<Item = BatchEntry> + Send + use<> {
        let total_files = tasks.len();
        let supervisor = self.supervisor.clone();
        let router = self.router.clone();
        let session_id = session_id.to_string();

        futures::stream::iter(tasks)
            .map(move |task| {
                run_one(
                    supervisor.clone(),
                    router.clone(),
                    session_id.clone(),
                    task,
                    total_files,
                )
            })
            .buffered(self.max_concurrent)
    }

    /// Run a whole batch, publish `batch-complete`, tear the session's
    /// subscriptions down and retain the result for archive download.
    pub async fn complete(&self, session_id: &str, tasks: Vec<ConversionTask>) -> BatchResult {
        let entries: Vec<BatchEntry> = self.run_batch(session_id, tasks).collect().await;
        let result = BatchResult::from(entries);

        info!(
            session_id,
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "batch complete"
        );

        self.router.retain_batch_result(session_id, result.clone());
        self.router
            .publish(session_id, SessionEvent::BatchComplete(result.clone()));
        self.router.unsubscribe_all(session_id);
        result
    }
}

async fn run_one(
    supervisor: JobSupervisor,
    router: Arc<SessionEventRouter>,
    session_id: String,
    task: ConversionTask,
    total_files: usize,
) -> BatchEntry {
    let index = task.index;
    let file_name = task.original_name.clone();
    let mut handle = supervisor.run_task(task);

    let mut outcome = None;
    while let Some(event) = handle.next().await {
        match event {
            TaskEvent::Progress(p) => {
                router.publish(
                    &session_id,
                    SessionEvent::BatchProgress(BatchProgress {
                        current_file_index: index,
                        current_file: index + 1,
                        total_files,
                        file_name: file_name.clone(),
                        speed: p.speed.unwrap_or_else(|| crate::progress::UNKNOWN.into()),
                        elapsed_time: p.elapsed_time,
                    }),
                );
            }
            TaskEvent::Done(o) => outcome = Some(o),
        }
    }

    let outcome = outcome.unwrap_or_else(|| {
        TaskOutcome::Failed(TaskFailure::Io("supervisor stopped without an outcome".into()))
    });
    BatchEntry::from_outcome(file_name, &outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(success: bool) -> BatchEntry {
        BatchEntry {
            success,
            output_file: success.then(|| "output_s_0.jpg".to_string()),
            original_file: "a.png".into(),
            error: (!success).then(|| "exit code 1".to_string()),
        }
    }

    #[test]
    fn counts() {
        let result = BatchResult::from(vec![entry(true), entry(false), entry(true)]);
        assert_eq!(result.len(), 3);
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
    }

    #[test]
    fn serializes_as_plain_array() {
        let result = BatchResult::from(vec![entry(false)]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "success": false,
                "outputFile": null,
                "originalFile": "a.png",
                "error": "exit code 1",
            }])
        );
    }

    #[tokio::test]
    async fn missing_engine_fails_every_entry_without_aborting() {
        let router = Arc::new(SessionEventRouter::new());
        let supervisor =
            JobSupervisor::new("/nonexistent/mediaconv-engine".into(), None);
        let coordinator = BatchCoordinator::new(supervisor, router.clone(), 1);

        let inputs: Vec<crate::args::TaskInput> = ["a.mov", "b.mov"]
            .iter()
            .map(|n| crate::args::TaskInput {
                input_path: std::path::PathBuf::from("/tmp").join(n),
                original_name: n.to_string(),
            })
            .collect();
        let tasks = crate::args::build_tasks(&inputs, "", |i| {
            std::path::PathBuf::from(format!("/tmp/output_s_{i}.mp4"))
        });

        let mut sub = router.subscribe("s", crate::router::EventKind::BatchComplete);
        let result = coordinator.complete("s", tasks).await;

        assert_eq!(result.len(), 2);
        assert_eq!(result.failure_count(), 2);
        assert_eq!(result.entries()[0].original_file, "a.mov");
        assert_eq!(result.entries()[1].original_file, "b.mov");
        assert!(
            result.entries()[0]
                .error
                .as_deref()
                .unwrap()
                .starts_with("failed to start engine")
        );

        assert_eq!(sub.recv().await, Some(SessionEvent::BatchComplete(result.clone())));
        assert_eq!(sub.recv().await, None);
        assert_eq!(router.batch_result("s").unwrap(), result);
    }
}
