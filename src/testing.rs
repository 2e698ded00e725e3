use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use blob_store::{BlobStorage, BlobStorageConfig, GatewayError, StorageGateway};
use bytes::Bytes;
use futures::stream;
use state_store::{InMemoryShareRegistry, ShareRegistryConfig};
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    config::{ServerConfig, UploadLimits},
    service::Service,
    upload::FileUpload,
};

/// Storage gateway over an in-memory bucket that records how it was called
/// and can be told to misbehave.
pub struct RecordingGateway {
    inner: BlobStorage,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    in_flight_puts: AtomicUsize,
    peak_in_flight_puts: AtomicUsize,
    put_delay_ms: AtomicU64,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    withhold_public_urls: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Result<Self> {
        let inner = BlobStorage::new(BlobStorageConfig {
            path: "memory:///".to_string(),
            region: None,
            public_base_url: Some("https://files.example.com".to_string()),
        })?;
        Ok(Self {
            inner,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            in_flight_puts: AtomicUsize::new(0),
            peak_in_flight_puts: AtomicUsize::new(0),
            put_delay_ms: AtomicU64::new(0),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            withhold_public_urls: AtomicBool::new(false),
        })
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight_puts(&self) -> usize {
        self.peak_in_flight_puts.load(Ordering::SeqCst)
    }

    /// Holds every put open for `delay` so overlapping puts become visible.
    pub fn set_put_delay(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn withhold_public_urls(&self, withhold: bool) {
        self.withhold_public_urls.store(withhold, Ordering::SeqCst);
    }

    pub async fn stored_bytes(&self, path: &str) -> Option<Bytes> {
        self.inner.read_bytes(path).await.ok()
    }
}

#[async_trait]
impl StorageGateway for RecordingGateway {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), GatewayError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight_puts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight_puts
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let result = if self.fail_puts.load(Ordering::SeqCst) {
            Err(GatewayError::Rejected("bucket is read only".to_string()))
        } else {
            self.inner.put(path, data, content_type).await
        };

        self.in_flight_puts.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, paths: &[String]) -> Result<(), GatewayError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        self.inner.delete(paths).await
    }

    fn public_url(&self, path: &str) -> Result<String, GatewayError> {
        if self.withhold_public_urls.load(Ordering::SeqCst) {
            return Err(GatewayError::NoPublicUrl(path.to_string()));
        }
        self.inner.public_url(path)
    }
}

pub fn test_limits() -> UploadLimits {
    UploadLimits {
        max_file_size: 1024,
        chunk_size: 64,
        max_batch_files: 20,
        max_concurrent_uploads: 5,
    }
}

pub struct TestService {
    pub service: Service,
    pub gateway: Arc<RecordingGateway>,
}

impl TestService {
    pub fn new() -> Result<Self> {
        Self::with_limits(test_limits())
    }

    pub fn with_limits(limits: UploadLimits) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let config = ServerConfig {
            share_base_url: "http://share.test/s".to_string(),
            blob_storage: BlobStorageConfig {
                path: "memory:///".to_string(),
                region: None,
                public_base_url: Some("https://files.example.com".to_string()),
            },
            registry: ShareRegistryConfig::InMemory,
            limits,
            ..Default::default()
        };
        config.validate()?;

        let gateway = Arc::new(RecordingGateway::new()?);
        let service = Service::with_components(
            config,
            gateway.clone(),
            Arc::new(InMemoryShareRegistry::new()),
        );
        Ok(Self { service, gateway })
    }
}

pub type TestBody = stream::Iter<std::vec::IntoIter<std::io::Result<Bytes>>>;

/// A file whose body arrives as `chunks`.
pub fn chunked_upload(
    filename: &str,
    chunks: Vec<Vec<u8>>,
    declared_size: Option<u64>,
) -> FileUpload<TestBody> {
    FileUpload {
        filename: filename.to_string(),
        content_type: Some("text/plain".to_string()),
        declared_size,
        body: stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(Bytes::from(chunk)))
                .collect::<Vec<_>>(),
        ),
    }
}

pub fn file_upload(filename: &str, contents: &[u8]) -> FileUpload<TestBody> {
    chunked_upload(filename, vec![contents.to_vec()], Some(contents.len() as u64))
}
