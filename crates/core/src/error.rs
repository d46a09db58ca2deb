use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to HTTP clients of the conversion service.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Rejected upload: no file, mixed media kinds, malformed form.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown or expired session, missing output file.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session exists but its batch has not finished yet.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    // (HTTP status, machine-readable code)
    fn kind(&self) -> (u16, &'static str) {
        match self {
            Self::BadRequest(_) => (400, "bad_request"),
            Self::NotFound(_) => (404, "not_found"),
            Self::Conflict(_) => (409, "conflict"),
            Self::Internal(_) => (500, "internal_error"),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().1
    }

    pub fn status_code(&self) -> u16 {
        self.kind().0
    }
}

/// Body of every error response, e.g.
/// `{"error":{"code":"conflict","message":"conflict: batch 42 is still running","details":{}}}`.
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    /// Always an object so clients can index into it unconditionally.
    pub details: serde_json::Value,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        Self {
            error: ErrorBody {
                code: e.code(),
                message: e.to_string(),
                details: serde_json::json!({}),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_code_and_message() {
        let err = ApiError::BadRequest("No file uploaded".into());
        assert_eq!(err.status_code(), 400);

        let json = serde_json::to_value(ErrorEnvelope::from(&err)).unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
        assert_eq!(json["error"]["message"], "bad request: No file uploaded");
        assert!(json["error"]["details"].as_object().unwrap().is_empty());
    }

    #[test]
    fn running_batch_is_a_conflict() {
        let err = ApiError::Conflict("batch 42 is still running".into());
        assert_eq!((err.status_code(), err.code()), (409, "conflict"));
    }
}
