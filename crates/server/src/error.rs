use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mediaconv_core::error::{ApiError, ErrorEnvelope};
use mediaconv_transcoder::TranscodeError;

/// Newtype wrapper so we can implement `IntoResponse` in this crate.
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.0);
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<TranscodeError> for AppError {
    fn from(e: TranscodeError) -> Self {
        let api = match e {
            TranscodeError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            TranscodeError::SessionNotFound(id) => {
                ApiError::NotFound(format!("no batch for session {id}"))
            }
            TranscodeError::BatchNotReady(id) => {
                ApiError::Conflict(format!("batch {id} is still running"))
            }
            other => ApiError::Internal(other.to_string()),
        };
        Self(api)
    }
}
