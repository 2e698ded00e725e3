//! Single and batch file ingestion.
//!
//! A body is read in `chunk_size` pieces and rejected as soon as it grows past
//! `max_file_size`; storage only sees bodies that passed every check. Batches
//! fan out to one task per file, gated by a semaphore so at most
//! `max_concurrent_uploads` files are read and stored at once.

use std::{io, sync::Arc};

use blob_store::StorageGateway;
use bytes::{Bytes, BytesMut};
use data_model::{ShareEntry, ShareEntryBuilder, ShareId};
use futures::Stream;
use metrics::{api_io_stats, AutoIncrement};
use opentelemetry::KeyValue;
use state_store::{RegistryError, ShareRegistry};
use tokio::{io::AsyncReadExt, sync::Semaphore};
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};

use crate::{
    config::UploadLimits,
    error::{ClientBodyError, ShareError},
    share::ShareLinks,
};

pub mod naming;
pub mod spool;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Share ids drawn before giving up on finding a free one.
const MAX_SHARE_ID_ATTEMPTS: usize = 5;

fn body_read_error(error: io::Error) -> ShareError {
    let message = format!("failed to read upload: {}", error);
    match error.get_ref() {
        Some(inner) if inner.is::<ClientBodyError>() => ShareError::InvalidRequest(message),
        _ => ShareError::Unexpected(message),
    }
}

/// One file as received from a client.
pub struct FileUpload<S> {
    pub filename: String,
    pub content_type: Option<String>,
    /// Size announced by the client, if any. Never trusted on its own.
    pub declared_size: Option<u64>,
    pub body: S,
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub share_id: ShareId,
    pub storage_path: String,
    pub original_filename: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub public_url: Option<String>,
    pub share_url: String,
}

impl UploadReceipt {
    pub fn generated_filename(&self) -> String {
        naming::generated_filename(&self.storage_path).to_string()
    }
}

#[derive(Debug)]
pub struct FailedFile {
    pub filename: String,
    pub error: ShareError,
}

/// Per-file results of a batch, each list in request order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub successful: Vec<UploadReceipt>,
    pub failed: Vec<FailedFile>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

#[derive(Clone)]
pub struct UploadCoordinator {
    gateway: Arc<dyn StorageGateway>,
    registry: Arc<dyn ShareRegistry>,
    limits: UploadLimits,
    links: ShareLinks,
    metrics: Arc<api_io_stats::Metrics>,
}

impl UploadCoordinator {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        registry: Arc<dyn ShareRegistry>,
        limits: UploadLimits,
        links: ShareLinks,
        metrics: Arc<api_io_stats::Metrics>,
    ) -> Self {
        Self {
            gateway,
            registry,
            limits,
            links,
            metrics,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    #[tracing::instrument(skip_all, fields(filename = %upload.filename))]
    pub async fn upload_one<S>(&self, upload: FileUpload<S>) -> Result<UploadReceipt, ShareError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let result = self.store(upload).await;
        match &result {
            Ok(receipt) => {
                self.metrics.uploads.increment(&[]);
                self.metrics.upload_bytes.add(receipt.size_bytes, &[]);
            }
            Err(e) => {
                self.metrics
                    .upload_failures
                    .increment(&[KeyValue::new("kind", e.kind())]);
            }
        }
        result
    }

    async fn store<S>(&self, upload: FileUpload<S>) -> Result<UploadReceipt, ShareError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let limit = self.limits.max_file_size;
        if upload.declared_size.is_some_and(|size| size > limit) {
            return Err(ShareError::TooLarge { limit });
        }

        let data = self.read_body(upload.body).await?;
        if data.is_empty() {
            return Err(ShareError::EmptyFile);
        }

        let storage_path = naming::storage_path(&upload.filename);
        let content_type = upload
            .content_type
            .filter(|content_type| !content_type.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let size_bytes = data.len() as u64;

        self.gateway
            .put(&storage_path, data, &content_type)
            .await?;

        let public_url = match self.gateway.public_url(&storage_path) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(%storage_path, "no public url for stored object: {}", e);
                None
            }
        };

        let entry = ShareEntryBuilder::default()
            .share_id(ShareId::generate())
            .storage_path(storage_path.clone())
            .original_filename(upload.filename)
            .public_url(public_url)
            .content_type(content_type)
            .size_bytes(size_bytes)
            .build();
        let entry = match entry {
            Ok(entry) => self.register(entry),
            Err(e) => Err(ShareError::Unexpected(e.to_string())),
        };
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // nothing points at the object without a registry entry
                if let Err(delete_error) = self.gateway.delete(&[storage_path.clone()]).await {
                    error!(%storage_path, "failed to remove unregistered object: {}", delete_error);
                }
                return Err(e);
            }
        };

        info!(
            share_id = %entry.share_id,
            storage_path = %entry.storage_path,
            size_bytes,
            "file uploaded"
        );
        Ok(UploadReceipt {
            share_url: self.links.share_url(&entry.share_id),
            share_id: entry.share_id,
            storage_path: entry.storage_path,
            original_filename: entry.original_filename,
            size_bytes: entry.size_bytes,
            content_type: entry.content_type,
            public_url: entry.public_url,
        })
    }

    async fn read_body<S>(&self, body: S) -> Result<Bytes, ShareError>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let limit = self.limits.max_file_size;
        let reader = StreamReader::new(body);
        tokio::pin!(reader);

        let mut data = BytesMut::new();
        let mut chunk = vec![0u8; self.limits.chunk_size];
        loop {
            let read = reader.read(&mut chunk).await.map_err(body_read_error)?;
            if read == 0 {
                break;
            }
            if (data.len() + read) as u64 > limit {
                debug!(limit, "upload exceeded the size limit while streaming");
                return Err(ShareError::TooLarge { limit });
            }
            data.extend_from_slice(&chunk[..read]);
        }
        Ok(data.freeze())
    }

    /// Inserts `entry`, drawing a new share id whenever the registry reports
    /// the current one as taken.
    fn register(&self, mut entry: ShareEntry) -> Result<ShareEntry, ShareError> {
        for _ in 0..MAX_SHARE_ID_ATTEMPTS {
            match self.registry.insert(entry.clone()) {
                Ok(()) => return Ok(entry),
                Err(RegistryError::Conflict(share_id)) => {
                    warn!(%share_id, "share id already taken, drawing another");
                    entry.share_id = ShareId::generate();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ShareError::Unexpected(format!(
            "no free share id after {} attempts",
            MAX_SHARE_ID_ATTEMPTS
        )))
    }

    /// Uploads every file independently. Fails as a whole only when the batch
    /// itself is unacceptable; per-file failures end up in
    /// [`BatchOutcome::failed`].
    pub async fn upload_many<S>(&self, files: Vec<FileUpload<S>>) -> Result<BatchOutcome, ShareError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        if files.is_empty() {
            return Err(ShareError::InvalidRequest("no files provided".to_string()));
        }
        if files.len() > self.limits.max_batch_files {
            return Err(ShareError::TooManyFiles {
                limit: self.limits.max_batch_files,
            });
        }

        let permits = Arc::new(Semaphore::new(self.limits.max_concurrent_uploads));
        let mut tasks = Vec::with_capacity(files.len());
        for file in files {
            let filename = file.filename.clone();
            let coordinator = self.clone();
            let permits = permits.clone();
            let task = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ShareError::Unexpected(e.to_string()))?;
                coordinator.upload_one(file).await
            });
            tasks.push((filename, task));
        }

        let mut outcome = BatchOutcome::default();
        for (filename, task) in tasks {
            let result = task
                .await
                .unwrap_or_else(|e| Err(ShareError::Unexpected(format!("upload task failed: {}", e))));
            match result {
                Ok(receipt) => outcome.successful.push(receipt),
                Err(error) => outcome.failed.push(FailedFile { filename, error }),
            }
        }
        info!(
            successful = outcome.successful.len(),
            failed = outcome.failed.len(),
            "batch upload finished"
        );
        Ok(outcome)
    }
}
