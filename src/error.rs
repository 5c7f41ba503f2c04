use derive_more::Display;
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

/// Structured context carried alongside a taxonomy code. Only the fields a
/// given error actually has are populated; the rest are `None`.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// Error taxonomy from spec.md §7. Each variant maps to exactly one
/// `(code, statusCode)` pair.
#[derive(Debug, Display)]
pub enum Error {
    #[display("validation error: {msg}")]
    Validation { msg: String, context: ErrorContext },

    #[display("authentication error: {msg}")]
    Authentication { msg: String },

    #[display("authorization error: {msg}")]
    Authorization { msg: String },

    #[display("not found: {msg}")]
    NotFound { msg: String },

    #[display("conflict: {msg}")]
    Conflict { msg: String },

    #[display("upload session expired: {session_id}")]
    SessionExpired { session_id: String },

    #[display("file size limit exceeded: {msg}")]
    FileSizeLimit { msg: String },

    #[display("rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[display("chunk validation error: {msg}")]
    ChunkValidation { msg: String, chunk_index: Option<u32> },

    #[display("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[display("upload incomplete: missing chunks {missing:?}")]
    UploadIncomplete { missing: Vec<u32> },

    #[display("storage error at {path}: {error}")]
    Storage { error: String, path: String },

    #[display("IP blocked due to abuse")]
    IpBlocked,

    #[display("internal error: {msg}")]
    Internal { msg: String },

    /// Configuration load/deserialize failure. Only ever surfaces during
    /// startup (exit code 1), never serialized to a client — not part of
    /// the spec.md §7 taxonomy, so it shares `INTERNAL_ERROR`'s code.
    #[display("configuration error: {msg}")]
    Config { msg: String },
}

impl std::error::Error for Error {}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Authentication { .. } => "AUTHENTICATION_ERROR",
            Error::Authorization { .. } => "AUTHORIZATION_ERROR",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Conflict { .. } => "CONFLICT",
            Error::SessionExpired { .. } => "SESSION_EXPIRED",
            Error::FileSizeLimit { .. } => "FILE_SIZE_LIMIT",
            Error::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Error::ChunkValidation { .. } => "CHUNK_VALIDATION_ERROR",
            Error::HashMismatch { .. } => "HASH_MISMATCH",
            Error::UploadIncomplete { .. } => "UPLOAD_INCOMPLETE",
            Error::Storage { .. } => "STORAGE_ERROR",
            Error::IpBlocked => "IP_BLOCKED",
            Error::Internal { .. } => "INTERNAL_ERROR",
            Error::Config { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation { .. } => 400,
            Error::Authentication { .. } => 401,
            Error::Authorization { .. } => 403,
            Error::NotFound { .. } => 404,
            Error::Conflict { .. } => 409,
            Error::SessionExpired { .. } => 410,
            Error::FileSizeLimit { .. } => 413,
            Error::RateLimitExceeded { .. } => 429,
            Error::ChunkValidation { .. } => 400,
            Error::HashMismatch { .. } => 400,
            Error::UploadIncomplete { .. } => 400,
            Error::Storage { .. } => 500,
            Error::IpBlocked => 403,
            Error::Internal { .. } => 500,
            Error::Config { .. } => 500,
        }
    }

    /// The `{ error: { code, message, statusCode, ...context } }` body from
    /// spec.md §6. Internal detail (paths, raw I/O errors) is logged by the
    /// caller via `EventSink`, never placed in this body.
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = json!({
            "code": self.code(),
            "message": self.public_message(),
            "statusCode": self.status_code(),
        });

        let obj = body.as_object_mut().expect("object literal");
        match self {
            Error::Validation { context, .. } => {
                if let Some(fields) = &context.fields {
                    obj.insert("fields".into(), json!(fields));
                }
            }
            Error::ChunkValidation { chunk_index, .. } => {
                if let Some(idx) = chunk_index {
                    obj.insert("chunkIndex".into(), json!(idx));
                }
            }
            Error::RateLimitExceeded { retry_after } => {
                obj.insert("retryAfter".into(), json!(retry_after));
            }
            Error::UploadIncomplete { missing } => {
                obj.insert("missingChunks".into(), json!(missing));
            }
            _ => {}
        }

        json!({ "error": body })
    }

    /// Never exposes filesystem paths or raw I/O detail to the caller.
    fn public_message(&self) -> String {
        match self {
            Error::Storage { .. } => "storage backend failure".to_string(),
            Error::Internal { .. } => "internal error".to_string(),
            Error::Config { .. } => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Storage {
            error: error.to_string(),
            path: "<unknown>".to_string(),
        }
    }
}

/// Extension trait mirroring the teacher's `map_io_err`: attaches path
/// context to an I/O error as it's propagated.
pub trait ResultIoExt<T> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|error| Error::Storage {
            error: error.to_string(),
            path: path.display().to_string(),
        })
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if matches!(self, Error::Storage { .. } | Error::Internal { .. } | Error::Config { .. }) {
            tracing::error!(code = self.code(), "{}", self);
        }
        (status, axum::Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_status_codes_match_spec() {
        assert_eq!(
            Error::Validation {
                msg: "x".into(),
                context: ErrorContext::default()
            }
            .status_code(),
            400
        );
        assert_eq!(Error::SessionExpired { session_id: "x".into() }.status_code(), 410);
        assert_eq!(Error::RateLimitExceeded { retry_after: 5 }.status_code(), 429);
        assert_eq!(Error::IpBlocked.status_code(), 403);
    }

    #[test]
    fn storage_error_never_leaks_path() {
        let err = Error::Storage {
            error: "permission denied".into(),
            path: "/secret/data/path".into(),
        };
        let body = err.to_json();
        let serialized = body.to_string();
        assert!(!serialized.contains("/secret/data/path"));
    }
}
