//! Engine progress parsing.
//!
//! The engine reports progress on its diagnostic stream as lines like
//! `frame=  120 fps= 24 q=28.0 size=  512kB time=00:00:05.20 bitrate= 806.6kbits/s speed=2.1x`.
//! A read from that stream may carry several such lines; the last one wins.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

/// Wire value for a field the engine did not report.
pub const UNKNOWN: &str = "unknown";

static RE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(\d+:\d{2}:\d{2}\.\d+)").unwrap());

static RE_FRAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());

static RE_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?x)").unwrap());

/// Snapshot of engine progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// `HH:MM:SS.fraction` of media processed so far.
    pub elapsed_time: String,
    #[serde(serialize_with = "or_unknown")]
    pub frame: Option<u64>,
    /// Multiplier as printed by the engine, e.g. `2.1x`.
    #[serde(serialize_with = "or_unknown")]
    pub speed: Option<String>,
}

impl ProgressEvent {
    /// Numeric speed multiplier, if reported.
    pub fn speed_multiplier(&self) -> Option<f64> {
        self.speed.as_deref()?.trim_end_matches('x').parse().ok()
    }
}

fn or_unknown<T: Serialize, S: Serializer>(value: &Option<T>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => v.serialize(s),
        None => s.serialize_str(UNKNOWN),
    }
}

fn last_capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Extract progress from a chunk of diagnostic output.
///
/// Returns `None` unless a `time=` field is present. Missing `frame=` or
/// `speed=` fields are reported as unknown.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let elapsed_time = last_capture(&RE_TIME, line)?.to_string();
    let frame = last_capture(&RE_FRAME, line).and_then(|f| f.parse().ok());
    let speed = last_capture(&RE_SPEED, line).map(str::to_string);

    Some(ProgressEvent {
        elapsed_time,
        frame,
        speed,
    })
}
