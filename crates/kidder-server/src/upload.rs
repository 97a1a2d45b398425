//! Image upload endpoint.
//!
//! Turns a multipart image into a file under the uploads directory and
//! answers with the URL chat messages should reference.

use crate::config::UploadConfig;
use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{
        multipart::{Field, MultipartError},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Multipart field carrying the image.
pub const FIELD_NAME: &str = "image";

/// Extension used when the uploaded file name has none.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// URL prefix uploads are served under.
pub const URL_PREFIX: &str = "/uploads";

/// Upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Error parsing `multipart/form-data` request: {0}")]
    Form(#[from] MultipartError),

    #[error("Missing `image` field")]
    MissingField,

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        let body = ErrorResponse {
            error: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// POST /upload
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FIELD_NAME) {
            return store_field(field, &state.config.uploads).await.map(Json);
        }
    }
    Err(UploadError::MissingField)
}

async fn store_field(
    field: Field<'_>,
    uploads: &UploadConfig,
) -> Result<UploadResponse, UploadError> {
    let content_type = field.content_type().unwrap_or_default().to_string();
    if !uploads.is_allowed(&content_type) {
        warn!(content_type = %content_type, "Rejected upload");
        return Err(UploadError::UnsupportedType(content_type));
    }

    let file_name = unique_file_name(field.file_name());
    let data = field.bytes().await?;
    if data.len() > uploads.max_size {
        return Err(UploadError::TooLarge {
            size: data.len(),
            limit: uploads.max_size,
        });
    }

    let dir = uploads.dir();
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        error!(dir = %dir.display(), error = %e, "Failed to create upload directory");
        UploadError::Io(e)
    })?;
    tokio::fs::write(dir.join(&file_name), &data)
        .await
        .map_err(|e| {
            error!(file = %file_name, error = %e, "Failed to store upload");
            UploadError::Io(e)
        })?;

    metrics::record_upload(data.len());
    debug!(file = %file_name, bytes = data.len(), "Stored upload");

    Ok(UploadResponse {
        image_url: format!("{URL_PREFIX}/{file_name}"),
    })
}

/// A random file name keeping the original extension.
#[must_use]
pub fn unique_file_name(original: Option<&str>) -> String {
    let bytes: [u8; 16] = rand::rng().random();
    let stem: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{stem}.{}", extension(original))
}

fn extension(original: Option<&str>) -> String {
    original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map_or_else(|| DEFAULT_EXTENSION.to_string(), str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_file_name_shape() {
        let name = unique_file_name(Some("cat.PNG"));
        let (stem, ext) = name.split_once('.').unwrap();
        assert_eq!(stem.len(), 32);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, "png");
    }

    #[test]
    fn test_unique_file_names_differ() {
        assert_ne!(unique_file_name(None), unique_file_name(None));
    }

    #[test]
    fn test_default_extension() {
        assert!(unique_file_name(None).ends_with(".jpg"));
        assert!(unique_file_name(Some("photo")).ends_with(".jpg"));
        assert!(unique_file_name(Some("../../etc/pass.w/d")).ends_with(".jpg"));
        assert!(unique_file_name(Some("shell.ph p")).ends_with(".jpg"));
    }

    #[test]
    fn test_error_status() {
        let too_large = UploadError::TooLarge { size: 2, limit: 1 }.into_response();
        assert_eq!(too_large.status(), StatusCode::BAD_REQUEST);

        let io = UploadError::Io(std::io::Error::other("disk full")).into_response();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
