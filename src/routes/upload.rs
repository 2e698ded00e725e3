use std::io;

use axum::{
    extract::{multipart::Field, Multipart, State},
    http::{header::CONTENT_LENGTH, HeaderMap},
    Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

use super::routes_state::RouteState;
use crate::{
    error::{ClientBodyError, ShareError},
    http_objects::{ApiError, BatchUploadResponse, UploadResponse},
    upload::{spool::spool_to_tempfile, FileUpload},
};

const FILE_FIELD: &str = "file";
const FILES_FIELD: &str = "files";

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct SingleUploadForm {
    #[schema(format = "binary")]
    file: String,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct BatchUploadForm {
    /// One part per file, all named `files`.
    files: Vec<String>,
}

fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

fn invalid_multipart(error: impl ToString) -> ShareError {
    ShareError::InvalidRequest(format!("malformed multipart body: {}", error.to_string()))
}

fn field_upload(field: Field<'_>) -> FileUpload<impl Stream<Item = io::Result<Bytes>> + Send + '_> {
    FileUpload {
        filename: field.file_name().unwrap_or_default().to_string(),
        content_type: field.content_type().map(str::to_string),
        declared_size: declared_size(field.headers()),
        body: field.map(|chunk| chunk.map_err(ClientBodyError::into_io)),
    }
}

/// Upload a file and get a share link for it
#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", content = inline(SingleUploadForm)),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = BAD_REQUEST, description = "Empty file or missing file field", body = ApiError),
        (status = PAYLOAD_TOO_LARGE, description = "File exceeds the size limit", body = ApiError),
        (status = INTERNAL_SERVER_ERROR, description = "Storage failure", body = ApiError)
    ),
)]
pub async fn upload_file(
    State(state): State<RouteState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let receipt = state.coordinator.upload_one(field_upload(field)).await?;
        return Ok(Json(receipt.into()));
    }
    Err(ShareError::InvalidRequest(format!("missing `{}` field", FILE_FIELD)).into())
}

/// Upload several files at once
///
/// Every file is stored independently; failures are reported per file.
#[utoipa::path(
    post,
    path = "/upload-multiple",
    tag = "uploads",
    request_body(content_type = "multipart/form-data", content = inline(BatchUploadForm)),
    responses(
        (status = 200, description = "Per file results", body = BatchUploadResponse),
        (status = BAD_REQUEST, description = "Too many files or no files", body = ApiError)
    ),
)]
pub async fn upload_files(
    State(state): State<RouteState>,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, ApiError> {
    let limits = state.coordinator.limits().clone();
    let mut files: Vec<FileUpload<ReaderStream<File>>> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        if files.len() == limits.max_batch_files {
            return Err(ShareError::TooManyFiles {
                limit: limits.max_batch_files,
            }
            .into());
        }

        let upload = field_upload(field);
        // one byte past the limit is enough to reject it later
        let spooled = spool_to_tempfile(upload.body, limits.max_file_size + 1)
            .await
            .map_err(ShareError::from)?;
        files.push(FileUpload {
            filename: upload.filename,
            content_type: upload.content_type,
            declared_size: upload.declared_size,
            body: ReaderStream::with_capacity(spooled, limits.chunk_size),
        });
    }

    let outcome = state.coordinator.upload_many(files).await?;
    Ok(Json(outcome.into()))
}
