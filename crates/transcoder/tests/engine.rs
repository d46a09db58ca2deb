//! End-to-end supervision tests against a shell script standing in for the
//! engine. The script fails for inputs containing `fail` and hangs for inputs
//! containing `hang`.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use mediaconv_core::types::{MediaKind, SessionMode};
use mediaconv_transcoder::args::{TaskInput, build_tasks};
use mediaconv_transcoder::router::{EventKind, SessionEvent, SessionEventRouter};
use mediaconv_transcoder::service::{ConversionService, Session, UploadedFile};
use mediaconv_transcoder::supervisor::{JobSupervisor, TaskEvent};
use mediaconv_transcoder::task::{TaskFailure, TaskOutcome};
use mediaconv_transcoder::TranscoderConfig;

const FAKE_ENGINE: &str = r#"#!/bin/sh
input="$2"
for last in "$@"; do :; done
case "$input" in
  *hang*) exec sleep 30 ;;
esac
printf 'Input #0, fake, from %s:\n' "$input" >&2
printf 'frame=   12 fps=0.0 q=-1.0 size=N/A time=00:00:00.48 bitrate=N/A speed=0.96x\r' >&2
printf 'frame=   25 fps=0.0 q=-1.0 size=N/A time=00:00:01.00 bitrate=N/A speed=1.93x\r' >&2
case "$input" in
  *fail*) echo "Conversion failed!" >&2; exit 1 ;;
esac
printf 'converted %s\n' "$input" > "$last"
exit 0
"#;

static ENGINE_DIR: LazyLock<tempfile::TempDir> = LazyLock::new(|| {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake-ffmpeg");
    std::fs::write(&path, FAKE_ENGINE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    dir
});

fn fake_engine() -> PathBuf {
    ENGINE_DIR.path().join("fake-ffmpeg")
}

fn inputs(dir: &Path, names: &[&str]) -> Vec<TaskInput> {
    names
        .iter()
        .map(|n| {
            let input_path = dir.join(n);
            std::fs::write(&input_path, b"media").unwrap();
            TaskInput {
                input_path,
                original_name: n.to_string(),
            }
        })
        .collect()
}

fn uploads(dir: &Path, names: &[&str]) -> Vec<UploadedFile> {
    inputs(dir, names)
        .into_iter()
        .map(|i| UploadedFile {
            input_path: i.input_path,
            original_name: i.original_name,
            media_kind: None,
        })
        .collect()
}

fn service(output_dir: &Path, max_concurrent: usize) -> ConversionService {
    let config = TranscoderConfig {
        engine_path: fake_engine(),
        output_dir: output_dir.to_path_buf(),
        max_concurrent,
        task_timeout: Some(Duration::from_secs(20)),
        result_ttl: None,
    };
    ConversionService::new(config, Arc::new(SessionEventRouter::new()))
}

#[tokio::test]
async fn successful_task_streams_progress_then_done() {
    let dir = tempfile::tempdir().unwrap();
    let input = inputs(dir.path(), &["clip.mov"]);
    let task = build_tasks(&input, "-c:v libx264", |_| dir.path().join("output_t.mp4"))
        .pop()
        .unwrap();

    let supervisor = JobSupervisor::new(fake_engine(), None);
    let mut handle = supervisor.run_task(task);

    let mut events = Vec::new();
    while let Some(event) = handle.next().await {
        events.push(event);
    }

    let (last, progress) = events.split_last().unwrap();
    assert_eq!(
        last,
        &TaskEvent::Done(TaskOutcome::Succeeded {
            output_file: "output_t.mp4".into()
        })
    );
    assert!(!progress.is_empty());
    assert!(progress.iter().all(|e| matches!(e, TaskEvent::Progress(_))));
    let TaskEvent::Progress(latest) = progress.last().unwrap() else {
        unreachable!()
    };
    assert_eq!(latest.elapsed_time, "00:00:01.00");
    assert_eq!(latest.frame, Some(25));

    assert!(dir.path().join("output_t.mp4").is_file());
    // Inputs are left for the caller to clean up.
    assert!(dir.path().join("clip.mov").is_file());
}

#[tokio::test]
async fn non_zero_exit_fails_with_code() {
    let dir = tempfile::tempdir().unwrap();
    let input = inputs(dir.path(), &["will_fail.mov"]);
    let task = build_tasks(&input, "", |_| dir.path().join("o.mp4")).pop().unwrap();

    let outcome = JobSupervisor::new(fake_engine(), None).run_task(task).wait().await;
    assert_eq!(outcome, TaskOutcome::Failed(TaskFailure::ExitCode(1)));
    assert_eq!(outcome.error().as_deref(), Some("exit code 1"));
}

#[tokio::test]
async fn missing_engine_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = inputs(dir.path(), &["clip.mov"]);
    let task = build_tasks(&input, "", |_| dir.path().join("o.mp4")).pop().unwrap();

    let missing = fake_engine().with_file_name("no-such-engine");
    let supervisor = JobSupervisor::new(missing, None);
    let outcome = supervisor.run_task(task).wait().await;
    assert!(matches!(outcome, TaskOutcome::Failed(TaskFailure::Spawn(_))));
}

#[tokio::test]
async fn hung_engine_is_killed_at_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let input = inputs(dir.path(), &["hang.mov"]);
    let task = build_tasks(&input, "", |_| dir.path().join("o.mp4")).pop().unwrap();

    let limit = Duration::from_millis(300);
    let started = std::time::Instant::now();
    let outcome = JobSupervisor::new(fake_engine(), Some(limit))
        .run_task(task)
        .wait()
        .await;

    assert_eq!(outcome, TaskOutcome::Failed(TaskFailure::TimedOut(limit)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn single_session_publishes_progress_then_complete() {
    let uploads_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let service = service(output_dir.path(), 1);
    let files = uploads(uploads_dir.path(), &["photo.jpg"]);

    let session = Session::open(SessionMode::Single, &files, MediaKind::Image).unwrap();
    let mut sub = service
        .router()
        .subscribe_many(&session.id, &[EventKind::Progress, EventKind::Complete]);

    let outcome = service
        .run_single(&session, files[0].clone(), "-vf scale=100:100 output.png")
        .await;

    let expected_name = format!("output_{}.png", session.id);
    assert_eq!(outcome.output_file(), Some(expected_name.as_str()));
    assert!(output_dir.path().join(&expected_name).is_file());

    let mut events = Vec::new();
    while let Some(event) = sub.recv().await {
        events.push(event);
    }
    let (last, rest) = events.split_last().unwrap();
    let SessionEvent::Complete(complete) = last else {
        panic!("terminal event must be last, got {last:?}");
    };
    assert!(complete.success);
    assert_eq!(complete.output_file.as_deref(), Some(expected_name.as_str()));
    assert!(rest.iter().all(|e| e.kind() == EventKind::Progress));

    assert_eq!(service.router().subscription_count(&session.id), 0);
}

#[tokio::test]
async fn batch_with_one_failure_keeps_order_and_archives_successes() {
    let uploads_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let service = service(output_dir.path(), 1);
    let files = uploads(uploads_dir.path(), &["a.png", "b_fail.png", "c.png"]);

    let session = Session::open(SessionMode::Batch, &files, MediaKind::Image).unwrap();
    let mut sub = service.router().subscribe_many(&session.id, &EventKind::ALL);

    let result = service.run_batch(&session, files, "output.webp").await;

    assert_eq!(result.len(), 3);
    let entries = result.entries();
    assert!(entries[0].success);
    assert_eq!(
        entries[0].output_file.as_deref(),
        Some(format!("output_{}_0.webp", session.id).as_str())
    );
    assert!(!entries[1].success);
    assert_eq!(entries[1].error.as_deref(), Some("exit code 1"));
    assert_eq!(entries[1].output_file, None);
    assert!(entries[2].success);
    let names: Vec<&str> = entries.iter().map(|e| e.original_file.as_str()).collect();
    assert_eq!(names, ["a.png", "b_fail.png", "c.png"]);

    let mut last_index = 0;
    let mut terminal = None;
    while let Some(event) = sub.recv().await {
        assert!(terminal.is_none(), "no event may follow batch-complete");
        match event {
            SessionEvent::BatchProgress(p) => {
                assert!(p.current_file_index >= last_index);
                assert_eq!(p.total_files, 3);
                last_index = p.current_file_index;
            }
            SessionEvent::BatchComplete(r) => terminal = Some(r),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(terminal, Some(result.clone()));

    let archive = service.build_archive(&session.id).await.unwrap();
    assert_eq!(archive.entries, 2);
    assert_eq!(archive.file.metadata().unwrap().len(), archive.len);
    let zip = zip::ZipArchive::new(archive.file).unwrap();
    assert_eq!(zip.len(), 2);
    let mut names: Vec<&str> = zip.file_names().collect();
    names.sort_unstable();
    assert_eq!(names, ["a.webp", "c.webp"]);
}

#[tokio::test]
async fn wider_batch_window_preserves_index_alignment() {
    let uploads_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let service = service(output_dir.path(), 3);
    let names = ["v0.mov", "v1_fail.mov", "v2.mov", "v3_fail.mov", "v4.mov"];
    let files = uploads(uploads_dir.path(), &names);

    let session = Session::open(SessionMode::Batch, &files, MediaKind::Video).unwrap();
    let result = service.run_batch(&session, files, "").await;

    assert_eq!(result.len(), names.len());
    assert_eq!(result.failure_count(), 2);
    for (i, entry) in result.entries().iter().enumerate() {
        assert_eq!(entry.original_file, names[i]);
        assert_eq!(entry.success, !names[i].contains("fail"));
        if entry.success {
            assert_eq!(
                entry.output_file.as_deref(),
                Some(format!("output_{}_{i}.mp4", session.id).as_str())
            );
        }
    }
}
