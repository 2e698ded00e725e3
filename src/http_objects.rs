use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::ToSchema;

use crate::{
    error::ShareError,
    share::ShareDetails,
    upload::{BatchOutcome, UploadReceipt},
};

/// Error body returned by every endpoint.
#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    /// Machine readable error kind, e.g. `too_large` or `not_found`.
    pub kind: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, kind: &str, message: &str) -> Self {
        Self {
            status_code,
            kind: kind.to_string(),
            message: message.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }
}

impl From<ShareError> for ApiError {
    fn from(error: ShareError) -> Self {
        let status_code = match &error {
            ShareError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ShareError::EmptyFile |
            ShareError::TooManyFiles { .. } |
            ShareError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ShareError::NotFound => StatusCode::NOT_FOUND,
            ShareError::StorageFailure(_) | ShareError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status_code, error.kind(), &error.public_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {} - {}", self.status_code, self.kind, self.message);
        } else {
            info!("API Error: {} - {} - {}", self.status_code, self.kind, self.message);
        }
        (self.status_code, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub ok: bool,
    /// Location of the object inside the bucket.
    pub path: String,
    /// Generated storage file name.
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
    pub public_url: Option<String>,
    pub share_url: String,
    pub share_id: String,
    pub upload_success: bool,
}

impl From<UploadReceipt> for UploadResponse {
    fn from(receipt: UploadReceipt) -> Self {
        Self {
            ok: true,
            filename: receipt.generated_filename(),
            path: receipt.storage_path,
            original_name: receipt.original_filename,
            size: receipt.size_bytes,
            content_type: receipt.content_type,
            public_url: receipt.public_url,
            share_url: receipt.share_url,
            share_id: receipt.share_id.to_string(),
            upload_success: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FailedUpload {
    pub filename: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchUploadResponse {
    pub successful_uploads: Vec<UploadResponse>,
    pub failed_uploads: Vec<FailedUpload>,
    pub total_files: usize,
    pub successful_count: usize,
    pub failed_count: usize,
}

impl From<BatchOutcome> for BatchUploadResponse {
    fn from(outcome: BatchOutcome) -> Self {
        let successful_uploads: Vec<UploadResponse> =
            outcome.successful.into_iter().map(Into::into).collect();
        let failed_uploads: Vec<FailedUpload> = outcome
            .failed
            .into_iter()
            .map(|failure| FailedUpload {
                kind: failure.error.kind().to_string(),
                error: failure.error.public_message(),
                filename: failure.filename,
            })
            .collect();
        Self {
            total_files: successful_uploads.len() + failed_uploads.len(),
            successful_count: successful_uploads.len(),
            failed_count: failed_uploads.len(),
            successful_uploads,
            failed_uploads,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ShareInfo {
    pub share_url: String,
    /// Public URL of the stored object, when storage issued one.
    pub original_url: Option<String>,
    pub filename: String,
    /// Milliseconds since the unix epoch.
    pub created_at: u64,
}

impl From<ShareDetails> for ShareInfo {
    fn from(details: ShareDetails) -> Self {
        Self {
            share_url: details.share_url,
            original_url: details.public_url,
            filename: details.filename,
            created_at: details.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteResponse {
    pub ok: bool,
    pub message: String,
    pub share_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub bucket: String,
    pub registry: String,
    pub shares: usize,
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::{ApiError, BatchUploadResponse};
    use crate::{
        error::ShareError,
        upload::{BatchOutcome, FailedFile},
    };

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ShareError::TooLarge { limit: 10 }, StatusCode::PAYLOAD_TOO_LARGE),
            (ShareError::EmptyFile, StatusCode::BAD_REQUEST),
            (ShareError::TooManyFiles { limit: 20 }, StatusCode::BAD_REQUEST),
            (
                ShareError::StorageFailure("bucket gone".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ShareError::NotFound, StatusCode::NOT_FOUND),
            (
                ShareError::InvalidRequest("no file".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            let kind = error.kind();
            let api_error = ApiError::from(error);
            assert_eq!(api_error.status_code(), status);
            assert_eq!(api_error.kind, kind);
        }
    }

    #[test]
    fn test_storage_message_is_kept() {
        let api_error = ApiError::from(ShareError::StorageFailure("quota exceeded".to_string()));
        assert!(api_error.message.contains("quota exceeded"));
    }

    #[test]
    fn test_unexpected_details_are_hidden() {
        let api_error = ApiError::from(ShareError::Unexpected(
            "rocksdb: IO error: /var/lib/fileshare/LOCK".to_string(),
        ));
        assert_eq!(api_error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.kind, "unexpected");
        assert!(!api_error.message.contains("/var/lib"));
    }

    #[test]
    fn test_batch_failures_hide_unexpected_details() {
        let outcome = BatchOutcome {
            successful: vec![],
            failed: vec![
                FailedFile {
                    filename: "a.txt".to_string(),
                    error: ShareError::Unexpected(
                        "registry storage error: IO error: /var/lib/fileshare/registry/LOCK"
                            .to_string(),
                    ),
                },
                FailedFile {
                    filename: "b.txt".to_string(),
                    error: ShareError::StorageFailure("quota exceeded".to_string()),
                },
            ],
        };

        let response = BatchUploadResponse::from(outcome);
        assert_eq!(response.failed_count, 2);
        assert_eq!(response.failed_uploads[0].kind, "unexpected");
        assert_eq!(response.failed_uploads[0].error, "internal server error");
        assert!(response.failed_uploads[1].error.contains("quota exceeded"));

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("/var/lib"));
        assert!(!json.contains("registry storage error"));
    }
}
