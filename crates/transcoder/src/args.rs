//! Engine argument construction.
//!
//! No shell is ever involved: options are split with quote-aware tokenization
//! and the resulting vector is handed to the engine as-is.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use mediaconv_core::types::{MediaKind, TaskStatus};
use regex::Regex;

use crate::task::ConversionTask;

/// Engine flag designating the input file.
pub const INPUT_FLAG: &str = "-i";

/// Image formats a caller can request through an `output.<ext>` placeholder.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "png", "webp", "gif"];

pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Container used for every video output, whatever the options ask for.
pub const VIDEO_EXTENSION: &str = "mp4";

// Runs of non-space characters, where a double-quoted span counts as one run.
static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:[^\s"]+|"[^"]*")+"#).unwrap());

// Output slot: a token whose file name is `output.<ext>`, with or without a
// directory in front (`output.png`, `./OUTPUT.mp4`, `/tmp/output.webp`).
static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[/\\])output\.(jpg|png|webp|gif|mp4|mkv|mov|webm|avi)$").unwrap()
});

/// Split a raw options string on whitespace, keeping double-quoted spans
/// together and dropping the quote characters.
pub fn tokenize_options(raw: &str) -> Vec<String> {
    RE_TOKEN
        .find_iter(raw)
        .map(|m| m.as_str().replace('"', ""))
        .collect()
}

/// Lowercased extension of a placeholder token, `None` for any other token.
fn placeholder_extension(token: &str) -> Option<String> {
    RE_PLACEHOLDER
        .captures(token)
        .map(|c| c[1].to_ascii_lowercase())
}

/// Pick the output file extension for a conversion.
pub fn resolve_output_extension(raw_options: &str, kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => VIDEO_EXTENSION,
        MediaKind::Image => tokenize_options(raw_options)
            .iter()
            .find_map(|t| placeholder_extension(t))
            .and_then(|ext| IMAGE_EXTENSIONS.iter().copied().find(|e| *e == ext))
            .unwrap_or(DEFAULT_IMAGE_EXTENSION),
    }
}

/// Build the argument vector for one input.
///
/// The first placeholder token is replaced with `output`; without one the
/// output path is appended last.
pub fn build_arguments(input: &Path, raw_options: &str, output: &Path) -> Vec<String> {
    let output = output.to_string_lossy().into_owned();
    let mut args = vec![INPUT_FLAG.to_string(), input.to_string_lossy().into_owned()];

    let mut tokens = tokenize_options(raw_options);
    match tokens.iter().position(|t| placeholder_extension(t).is_some()) {
        Some(pos) => tokens[pos] = output,
        None => tokens.push(output),
    }

    args.extend(tokens);
    args
}

/// Output file name, unique per session and batch index.
pub fn output_file_name(session_id: &str, index: Option<usize>, ext: &str) -> String {
    match index {
        Some(i) => format!("output_{session_id}_{i}.{ext}"),
        None => format!("output_{session_id}.{ext}"),
    }
}

/// An input handed over by upload handling.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub input_path: PathBuf,
    pub original_name: String,
}

/// Build a pending task for one input.
pub fn build_task(
    index: usize,
    input: &TaskInput,
    raw_options: &str,
    output_path: PathBuf,
) -> ConversionTask {
    ConversionTask {
        index,
        input_path: input.input_path.clone(),
        original_name: input.original_name.clone(),
        args: build_arguments(&input.input_path, raw_options, &output_path),
        output_path,
        status: TaskStatus::Pending,
    }
}

/// Build one pending task per input, in submission order.
pub fn build_tasks(
    inputs: &[TaskInput],
    raw_options: &str,
    output_path_for: impl Fn(usize) -> PathBuf,
) -> Vec<ConversionTask> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| build_task(index, input, raw_options, output_path_for(index)))
        .collect()
}
