//! Multipart upload handling for conversion requests.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::Multipart;
use axum::extract::multipart::Field;
use mediaconv_core::error::ApiError;
use mediaconv_core::types::MediaKind;
use mediaconv_transcoder::service::UploadedFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Form field carrying the media file(s).
pub const FILE_FIELD: &str = "video";

/// A decoded conversion form.
#[derive(Debug, Default)]
pub struct ConversionForm {
    pub files: Vec<UploadedFile>,
    pub options: String,
    pub is_image: bool,
}

impl ConversionForm {
    /// Kind the client declared, used for files whose type is unknown.
    pub fn declared_kind(&self) -> MediaKind {
        if self.is_image {
            MediaKind::Image
        } else {
            MediaKind::Video
        }
    }
}

/// Keep only the final path component and replace anything outside
/// `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "upload".to_string(),
        _ => cleaned,
    }
}

/// Stored name of an upload: `<millis>-<request tag>-<index>-<sanitised name>`.
/// The tag is drawn once per request, so concurrent requests never share a
/// path even within the same millisecond.
pub fn upload_file_name(stamp: u128, request_tag: &str, index: usize, original: &str) -> String {
    format!("{stamp}-{request_tag}-{index}-{}", sanitize_file_name(original))
}

/// Read a conversion form, writing every file part into `upload_dir`.
pub async fn read_conversion_form(
    mut multipart: Multipart,
    upload_dir: &Path,
) -> Result<ConversionForm, ApiError> {
    let mut form = ConversionForm::default();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let request = Upload {
        dir: upload_dir,
        stamp,
        tag: uuid::Uuid::new_v4().simple().to_string(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed upload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD => {
                let index = form.files.len();
                if let Some(file) = store_file(field, &request, index).await? {
                    form.files.push(file);
                }
            }
            "options" => form.options = read_text(field).await?,
            "isImage" => form.is_image = read_text(field).await?.trim() == "true",
            other => debug!(field = other, "ignoring form field"),
        }
    }

    Ok(form)
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed form field: {e}")))
}

struct Upload<'a> {
    dir: &'a Path,
    stamp: u128,
    tag: String,
}

async fn store_file(
    mut field: Field<'_>,
    request: &Upload<'_>,
    index: usize,
) -> Result<Option<UploadedFile>, ApiError> {
    let original_name = match field.file_name() {
        Some(n) if !n.is_empty() => n.to_string(),
        // Browsers send an empty part when no file was picked.
        _ => return Ok(None),
    };
    let media_kind = field.content_type().and_then(MediaKind::from_mime);

    let input_path = request.dir.join(upload_file_name(
        request.stamp,
        &request.tag,
        index,
        &original_name,
    ));
    // Never reuse a path another request may still be converting from.
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&input_path)
        .await
        .map_err(|e| ApiError::Internal(format!("create upload: {e}")))?;

    let mut size = 0usize;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(format!("upload interrupted: {e}")))?
    {
        size += chunk.len();
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(format!("write upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::Internal(format!("write upload: {e}")))?;

    info!(path = %input_path.display(), size, kind = ?media_kind, "upload stored");

    Ok(Some(UploadedFile {
        input_path,
        original_name,
        media_kind,
    }))
}
