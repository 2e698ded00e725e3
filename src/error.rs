use std::io;

use blob_store::GatewayError;
use state_store::RegistryError;

/// Failures surfaced to clients. Every variant maps to a stable `kind` string
/// that callers can match on.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("file exceeds the maximum size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("file is empty")]
    EmptyFile,

    #[error("too many files, at most {limit} are accepted per request")]
    TooManyFiles { limit: usize },

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("file not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ShareError {
    pub fn kind(&self) -> &'static str {
        match self {
            ShareError::TooLarge { .. } => "too_large",
            ShareError::EmptyFile => "empty_file",
            ShareError::TooManyFiles { .. } => "too_many_files",
            ShareError::StorageFailure(_) => "storage_failure",
            ShareError::NotFound => "not_found",
            ShareError::InvalidRequest(_) => "invalid_request",
            ShareError::Unexpected(_) => "unexpected",
        }
    }

    /// Text shown to clients. Details of unexpected errors only go to the
    /// logs.
    pub fn public_message(&self) -> String {
        match self {
            ShareError::Unexpected(details) => {
                tracing::error!(%details, "unexpected error while serving request");
                "internal server error".to_string()
            }
            e => e.to_string(),
        }
    }
}

impl From<GatewayError> for ShareError {
    fn from(error: GatewayError) -> Self {
        ShareError::StorageFailure(error.to_string())
    }
}

impl From<RegistryError> for ShareError {
    fn from(error: RegistryError) -> Self {
        ShareError::Unexpected(error.to_string())
    }
}

/// Wraps body read failures caused by the client, such as a dropped
/// connection or a malformed multipart part. Any other error from a body
/// stream is treated as a server fault.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ClientBodyError(pub String);

impl ClientBodyError {
    pub fn into_io(error: impl ToString) -> io::Error {
        io::Error::other(Self(error.to_string()))
    }
}
