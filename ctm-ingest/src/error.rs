//! Error types for ctm-ingest
//!
//! Three layers: [`IngestError`] aborts a whole upload, [`RecordRejection`]
//! drops a single record while the upload carries on, and [`ApiError`] maps
//! either onto an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline-fatal errors: the upload is rejected as a whole
#[derive(Debug, Error)]
pub enum IngestError {
    /// Content matched none of the accepted shapes
    #[error("Invalid file format. Please upload CSV, JSON, or XML files only.")]
    FormatUnrecognized,

    /// Byte-identical content was processed before
    #[error("This file has already been processed. Skipping to prevent duplicates.")]
    DuplicateUpload {
        /// Fingerprint of the rejected content
        digest: String,
    },

    /// Content was classified but its structure cannot be decoded
    #[error("Malformed {format} content: {reason}")]
    StructuralParseFailure {
        format: &'static str,
        reason: String,
    },

    /// Store unavailable before per-record processing started
    #[error("Storage error: {0}")]
    Store(#[from] ctm_common::Error),
}

/// Result type for pipeline operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Per-record failures, recovered inside the pipeline
///
/// These never reach the caller. Everything except `PersistenceFailure`
/// is accompanied by an outlier log entry.
#[derive(Debug, Error)]
pub enum RecordRejection {
    #[error("Referenced patient not enrolled: {0}")]
    ReferenceNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Duplicate record: {0}")]
    DuplicateRecord(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] ctm_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured size limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Too many event subscribers (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Pipeline rejected the upload
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// ctm-common error
    #[error("Common error: {0}")]
    Common(#[from] ctm_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            ApiError::Ingest(ref err) => match err {
                IngestError::FormatUnrecognized => {
                    (StatusCode::BAD_REQUEST, "FORMAT_UNRECOGNIZED", err.to_string())
                }
                IngestError::DuplicateUpload { .. } => {
                    (StatusCode::CONFLICT, "DUPLICATE_UPLOAD", err.to_string())
                }
                IngestError::StructuralParseFailure { .. } => {
                    (StatusCode::BAD_REQUEST, "MALFORMED_CONTENT", err.to_string())
                }
                IngestError::Store(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    err.to_string(),
                ),
            },
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
