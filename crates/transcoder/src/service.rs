//! Conversion sessions: the entry points upload handling calls into.
//!
//! `start_*` validate synchronously, allocate a session id and return it
//! while the work continues on a background task. The `run_*` halves do the
//! work and can be awaited directly.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use mediaconv_core::types::{MediaKind, SessionMode};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveWriter, ZipArchiveWriter, write_batch_archive};
use crate::args::{
    TaskInput, build_task, build_tasks, output_file_name, resolve_output_extension,
};
use crate::batch::{BatchCoordinator, BatchResult};
use crate::router::{CompletePayload, SessionEvent, SessionEventRouter};
use crate::supervisor::{JobSupervisor, TaskEvent};
use crate::task::{TaskFailure, TaskOutcome};
use crate::{TranscodeError, TranscoderConfig};

/// A file delivered by upload handling.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub input_path: PathBuf,
    pub original_name: String,
    /// Kind detected from the upload itself, when known.
    pub media_kind: Option<MediaKind>,
}

/// One accepted conversion request.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub mode: SessionMode,
    pub total_files: usize,
    pub media_kind: MediaKind,
}

impl Session {
    /// Validate a request and allocate its session.
    ///
    /// `declared` is the caller's kind for files that carry none of their own.
    pub fn open(
        mode: SessionMode,
        files: &[UploadedFile],
        declared: MediaKind,
    ) -> Result<Self, TranscodeError> {
        if files.is_empty() {
            return Err(TranscodeError::InvalidRequest("No file uploaded".into()));
        }
        if mode == SessionMode::Single && files.len() != 1 {
            return Err(TranscodeError::InvalidRequest(format!(
                "single conversion takes one file, got {}",
                files.len()
            )));
        }

        let media_kind = files
            .first()
            .and_then(|f| f.media_kind)
            .unwrap_or(declared);
        if files
            .iter()
            .any(|f| f.media_kind.unwrap_or(declared) != media_kind)
        {
            return Err(TranscodeError::InvalidRequest(
                "Please select either all images or all videos, not mixed types".into(),
            ));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            total_files: files.len(),
            media_kind,
        })
    }
}

/// A finished batch archive, spooled to an anonymous temp file and rewound.
#[derive(Debug)]
pub struct BatchArchive {
    pub file: File,
    pub len: u64,
    pub entries: usize,
}

#[derive(Clone)]
pub struct ConversionService {
    config: Arc<TranscoderConfig>,
    router: Arc<SessionEventRouter>,
    supervisor: JobSupervisor,
}

impl ConversionService {
    pub fn new(config: TranscoderConfig, router: Arc<SessionEventRouter>) -> Self {
        let supervisor = JobSupervisor::new(config.engine_path.clone(), config.task_timeout);
        Self {
            config: Arc::new(config),
            router,
            supervisor,
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<SessionEventRouter> {
        &self.router
    }

    /// Start a single-file conversion in the background.
    pub fn start_single(
        &self,
        file: UploadedFile,
        raw_options: String,
        declared: MediaKind,
    ) -> Result<String, TranscodeError> {
        let session = Session::open(SessionMode::Single, std::slice::from_ref(&file), declared)?;
        let id = session.id.clone();
        self.router.open_session(&id);
        let service = self.clone();
        tokio::spawn(async move {
            service.run_single(&session, file, &raw_options).await;
        });
        Ok(id)
    }

    /// Start a batch conversion in the background.
    pub fn start_batch(
        &self,
        files: Vec<UploadedFile>,
        raw_options: String,
        declared: MediaKind,
    ) -> Result<String, TranscodeError> {
        let session = Session::open(SessionMode::Batch, &files, declared)?;
        let id = session.id.clone();
        // Registered before the id is handed out, so listeners can attach and
        // downloads answer "not ready" instead of "unknown".
        self.router.open_session(&id);
        self.router.mark_batch_running(&id);
        let service = self.clone();
        tokio::spawn(async move {
            service.run_batch(&session, files, &raw_options).await;
            if let Some(ttl) = service.config.result_ttl {
                tokio::time::sleep(ttl).await;
                if service.router.discard_batch_result(&session.id) {
                    debug!(session_id = %session.id, "batch result expired");
                }
            }
        });
        Ok(id)
    }

    /// Convert one file, publishing `progress` then `complete` for the session.
    pub async fn run_single(
        &self,
        session: &Session,
        file: UploadedFile,
        raw_options: &str,
    ) -> TaskOutcome {
        let ext = resolve_output_extension(raw_options, session.media_kind);
        let output_dir = self.config.output_dir.clone();
        let output_path = output_dir.join(output_file_name(&session.id, None, ext));
        let task = build_task(0, &to_input(file), raw_options, output_path);

        info!(session_id = %session.id, kind = %session.media_kind, "single conversion started");

        let mut handle = self.supervisor.run_task(task);
        let mut outcome = None;
        while let Some(event) = handle.next().await {
            match event {
                TaskEvent::Progress(p) => {
                    self.router.publish(&session.id, SessionEvent::Progress(p));
                }
                TaskEvent::Done(o) => outcome = Some(o),
            }
        }
        let outcome = outcome.unwrap_or_else(|| {
            TaskOutcome::Failed(TaskFailure::Io("supervisor stopped without an outcome".into()))
        });

        if !outcome.is_success() {
            warn!(session_id = %session.id, error = ?outcome.error(), "conversion failed");
        }

        self.router.publish(
            &session.id,
            SessionEvent::Complete(CompletePayload::from(&outcome)),
        );
        self.router.unsubscribe_all(&session.id);
        outcome
    }

    /// Convert every file of a batch, publishing `batch-progress` and a final
    /// `batch-complete` for the session.
    pub async fn run_batch(
        &self,
        session: &Session,
        files: Vec<UploadedFile>,
        raw_options: &str,
    ) -> BatchResult {
        let ext = resolve_output_extension(raw_options, session.media_kind);
        let output_dir = self.config.output_dir.clone();
        let inputs: Vec<TaskInput> = files.into_iter().map(to_input).collect();
        let tasks = build_tasks(&inputs, raw_options, |i| {
            output_dir.join(output_file_name(&session.id, Some(i), ext))
        });

        info!(
            session_id = %session.id,
            total_files = session.total_files,
            kind = %session.media_kind,
            "batch conversion started"
        );

        let coordinator = BatchCoordinator::new(
            self.supervisor.clone(),
            self.router.clone(),
            self.config.max_concurrent,
        );
        coordinator.complete(&session.id, tasks).await
    }

    /// Build the ZIP of a finished batch's successful outputs.
    ///
    /// The archive is written to a temp file that disappears once the
    /// returned handle is closed.
    pub async fn build_archive(&self, session_id: &str) -> Result<BatchArchive, TranscodeError> {
        let result = self.router.batch_result(session_id)?;
        let output_dir = self.config.output_dir.clone();

        tokio::task::spawn_blocking(move || {
            let mut writer = ZipArchiveWriter::new(tempfile::tempfile()?);
            let entries = write_batch_archive(&mut writer, &result, &output_dir)?;
            let mut file = writer.finalize()?;
            let len = file.seek(SeekFrom::End(0))?;
            file.rewind()?;
            info!(entries, bytes = len, "batch archive built");
            Ok::<_, TranscodeError>(BatchArchive { file, len, entries })
        })
        .await
        .map_err(|e| TranscodeError::Archive(format!("archive task failed: {e}")))?
    }
}

fn to_input(file: UploadedFile) -> TaskInput {
    TaskInput {
        input_path: file.input_path,
        original_name: file.original_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EventKind;

    fn upload(name: &str, kind: Option<MediaKind>) -> UploadedFile {
        UploadedFile {
            input_path: PathBuf::from("/uploads").join(name),
            original_name: name.into(),
            media_kind: kind,
        }
    }

    #[test]
    fn rejects_empty_requests() {
        let err = Session::open(SessionMode::Batch, &[], MediaKind::Video).unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidRequest(_)));
    }

    #[test]
    fn rejects_mixed_kinds() {
        let files = [
            upload("a.png", Some(MediaKind::Image)),
            upload("b.mp4", Some(MediaKind::Video)),
        ];
        assert!(Session::open(SessionMode::Batch, &files, MediaKind::Image).is_err());

        // Undetected kinds fall back to the declared one.
        let files = [upload("a.png", Some(MediaKind::Image)), upload("b", None)];
        assert!(Session::open(SessionMode::Batch, &files, MediaKind::Video).is_err());
        let session = Session::open(SessionMode::Batch, &files, MediaKind::Image).unwrap();
        assert_eq!(session.media_kind, MediaKind::Image);
        assert_eq!(session.total_files, 2);
    }

    #[test]
    fn session_ids_are_unique() {
        let files = [upload("a.mov", None)];
        let a = Session::open(SessionMode::Single, &files, MediaKind::Video).unwrap();
        let b = Session::open(SessionMode::Single, &files, MediaKind::Video).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.mode, SessionMode::Single);
    }

    #[tokio::test]
    async fn archive_requires_finished_batch() {
        let router = Arc::new(SessionEventRouter::new());
        let service = ConversionService::new(TranscoderConfig::default(), router.clone());

        assert!(matches!(
            service.build_archive("nope").await,
            Err(TranscodeError::SessionNotFound(_))
        ));

        router.mark_batch_running("busy");
        assert!(matches!(
            service.build_archive("busy").await,
            Err(TranscodeError::BatchNotReady(_))
        ));
    }

    fn unreachable_engine(result_ttl: Option<std::time::Duration>) -> ConversionService {
        let config = TranscoderConfig {
            engine_path: PathBuf::from("/nonexistent/mediaconv-engine"),
            result_ttl,
            ..TranscoderConfig::default()
        };
        ConversionService::new(config, Arc::new(SessionEventRouter::new()))
    }

    #[tokio::test]
    async fn started_batch_is_visible_before_it_runs() {
        let service = unreachable_engine(None);
        let files = vec![upload("a.png", Some(MediaKind::Image))];

        let id = service
            .start_batch(files, String::new(), MediaKind::Image)
            .unwrap();

        // The background task has not been polled yet on this runtime.
        assert!(matches!(
            service.router().batch_result(&id),
            Err(TranscodeError::BatchNotReady(_))
        ));
        assert!(service.router().attach(&id, &[EventKind::BatchComplete]).is_some());
    }

    #[tokio::test]
    async fn finished_batch_results_expire() {
        let service = unreachable_engine(Some(std::time::Duration::from_millis(50)));
        let files = vec![upload("a.png", Some(MediaKind::Image))];
        let id = service
            .start_batch(files, String::new(), MediaKind::Image)
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            if matches!(
                service.router().batch_result(&id),
                Err(TranscodeError::SessionNotFound(_))
            ) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "batch result never expired");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(service.router().session_count(), 0);
    }
}
