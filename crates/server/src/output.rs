use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use mediaconv_core::error::ApiError;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::AppError;
use crate::state::AppState;

/// Parse an HTTP Range header per RFC 7233.
/// Only supports single byte ranges: `bytes=start-end`, `bytes=start-` or `bytes=-suffix`.
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

pub fn parse_range_header(range_str: &str, file_size: u64) -> Result<ByteRange, ApiError> {
    let spec = range_str
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(|| ApiError::BadRequest("only bytes ranges supported".into()))?;

    if spec.contains(',') {
        return Err(ApiError::BadRequest("multi-range not supported".into()));
    }
    if file_size == 0 {
        return Err(ApiError::BadRequest("empty file".into()));
    }

    let (start_s, end_s) = spec.split_once('-').unwrap_or((spec, ""));

    if start_s.is_empty() {
        let suffix: u64 = end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range suffix".into()))?;
        return Ok(ByteRange {
            start: file_size.saturating_sub(suffix),
            end_inclusive: file_size - 1,
        });
    }

    let start: u64 = start_s
        .parse()
        .map_err(|_| ApiError::BadRequest("bad range start".into()))?;
    let end: u64 = if end_s.is_empty() {
        file_size - 1
    } else {
        end_s
            .parse()
            .map_err(|_| ApiError::BadRequest("bad range end".into()))?
    };

    if start >= file_size {
        return Err(ApiError::BadRequest(format!(
            "range start {start} >= file size {file_size}"
        )));
    }

    let end = end.min(file_size - 1);
    if start > end {
        return Err(ApiError::BadRequest("range start > end".into()));
    }

    Ok(ByteRange {
        start,
        end_inclusive: end,
    })
}

/// Content-type guess from file extension.
fn content_type_for_path(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Serve a converted file, with Range support so players can seek.
/// GET /output/{file}
pub async fn serve_output(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if file.contains("..") || file.contains('/') || file.contains('\\') {
        return Err(ApiError::BadRequest("invalid filename".into()).into());
    }

    let path = state.converter.config().output_dir.join(&file);
    if !path.is_file() {
        return Err(ApiError::NotFound("output file not found".into()).into());
    }

    let file_size = tokio::fs::metadata(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("stat error: {e}")))?
        .len();
    let content_type = content_type_for_path(&path);

    let mut handle = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("file open error: {e}")))?;

    let builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    let response = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(range_header) => {
            let Ok(range) = parse_range_header(range_header, file_size) else {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{file_size}"))
                    .body(Body::empty())
                    .map_err(|e| ApiError::Internal(format!("response error: {e}")).into());
            };

            let content_length = range.end_inclusive - range.start + 1;
            handle
                .seek(std::io::SeekFrom::Start(range.start))
                .await
                .map_err(|e| ApiError::Internal(format!("seek error: {e}")))?;
            let stream = tokio_util::io::ReaderStream::new(handle.take(content_length));

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, content_length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{file_size}", range.start, range.end_inclusive),
                )
                .body(Body::from_stream(stream))
        }
        None => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, file_size.to_string())
            .body(Body::from_stream(tokio_util::io::ReaderStream::new(handle))),
    };

    response.map_err(|e| ApiError::Internal(format!("response error: {e}")).into())
}
