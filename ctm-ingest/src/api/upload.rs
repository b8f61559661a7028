//! Upload endpoint
//!
//! POST /api/upload with a multipart `file` field. The file is decoded as
//! UTF-8 text and handed to the pipeline unchanged.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::{ApiError, ApiResult, IngestError};
use crate::services::RecordKind;
use crate::AppState;

/// Multipart framing allowance on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["csv", "json", "xml"];

const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/csv",
    "application/json",
    "application/xml",
    "text/xml",
    "text/plain",
    "application/vnd.ms-excel",
];

/// POST /api/upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(rename = "type")]
    pub record_type: RecordKind,
    pub count: usize,
}

/// Accept by extension or by declared MIME type
pub fn is_allowed_file(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    let extension_ok = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);

    let mime_ok = content_type
        .map(|mime| {
            let essence = mime.split(';').next().unwrap_or("").trim();
            ALLOWED_MIME_TYPES
                .iter()
                .any(|allowed| essence.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);

    extension_ok || mime_ok
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", e.body_text()))
    }
}

/// POST /api/upload
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        if !is_allowed_file(file_name.as_deref(), content_type.as_deref()) {
            return Err(ApiError::BadRequest(
                "Invalid file type. Please upload CSV, JSON, or XML files only.".to_string(),
            ));
        }

        let bytes = field.bytes().await.map_err(|e| {
            tracing::warn!("Failed to read upload bytes: {}", e);
            multipart_error(e)
        })?;

        upload = Some((file_name.unwrap_or_else(|| "upload".to_string()), bytes.to_vec()));
        break;
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    if bytes.len() > state.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "File too large. Maximum {} bytes.",
            state.max_upload_bytes
        )));
    }

    let content = String::from_utf8(bytes)
        .map_err(|_| ApiError::BadRequest("File is not valid UTF-8 text".to_string()))?;

    tracing::info!(file_name = %file_name, bytes = content.len(), "Upload received");

    match state.processor.process(&content).await {
        Ok(summary) => Ok(Json(UploadResponse {
            message: format!("Processed {} {}", summary.count, summary.record_type),
            record_type: summary.record_type,
            count: summary.count,
        })),
        Err(e) => {
            if let IngestError::Store(store_error) = &e {
                *state.last_error.write().await = Some(store_error.to_string());
            }
            Err(ApiError::Ingest(e))
        }
    }
}

/// Build upload routes
///
/// The body limit leaves room for multipart framing; the file itself is
/// checked against the configured limit in the handler.
pub fn upload_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
}
