use std::{env, fmt::Debug, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use metrics::{blob_storage, Timer};
use object_store::{
    aws::AmazonS3Builder,
    parse_url,
    path::Path,
    Attribute,
    ObjectStore,
    ObjectStoreScheme,
    PutMode,
    PutOptions,
    PutPayload,
};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    /// Bucket URL, e.g. `s3://bucket/prefix`, `file:///var/lib/fileshare` or
    /// `memory:///`.
    #[serde(default = "default_blob_store_path")]
    pub path: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Prefix under which stored objects are publicly readable. When unset the
    /// URL is derived from the bucket URL where the backend allows it.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        BlobStorageConfig {
            path: default_blob_store_path(),
            region: None,
            public_base_url: None,
        }
    }
}

fn default_blob_store_path() -> String {
    format!(
        "file://{}",
        env::current_dir()
            .expect("unable to get current directory")
            .join("fileshare_storage/blobs")
            .to_str()
            .expect("unable to get path as string")
    )
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The backend could not be reached or failed while serving the request.
    #[error("storage request failed: {0}")]
    Transport(String),

    /// The backend answered but refused the operation.
    #[error("storage rejected request: {0}")]
    Rejected(String),

    #[error("no public url available for {0}")]
    NoPublicUrl(String),
}

impl From<object_store::Error> for GatewayError {
    fn from(error: object_store::Error) -> Self {
        match error {
            object_store::Error::AlreadyExists { path, .. } => {
                GatewayError::Rejected(format!("object already exists: {}", path))
            }
            object_store::Error::Precondition { path, .. } => {
                GatewayError::Rejected(format!("precondition failed: {}", path))
            }
            object_store::Error::NotFound { path, .. } => {
                GatewayError::Rejected(format!("object not found: {}", path))
            }
            e => GatewayError::Transport(e.to_string()),
        }
    }
}

/// Narrow view of the object store used by uploads and deletes.
///
/// Paths are relative to the configured bucket prefix. `put` never
/// overwrites an existing object.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<(), GatewayError>;

    /// Deleting an object that does not exist succeeds.
    async fn delete(&self, paths: &[String]) -> Result<(), GatewayError>;

    fn public_url(&self, path: &str) -> Result<String, GatewayError>;
}

pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    prefix: Path,
    url: Url,
    scheme: ObjectStoreScheme,
    public_base_url: Option<String>,
    metrics: blob_storage::Metrics,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let url = config
            .path
            .parse::<Url>()
            .map_err(|e| anyhow!("invalid blob storage url {}: {}", config.path, e))?;
        let (scheme, _) = ObjectStoreScheme::parse(&url)?;
        let (object_store, prefix) = Self::build_object_store(&url, config.region)?;
        info!("using blob store path: {}", config.path);
        Ok(Self {
            object_store: Arc::from(object_store),
            prefix,
            url,
            scheme,
            public_base_url: config.public_base_url,
            metrics: blob_storage::Metrics::new(),
        })
    }

    fn build_object_store(url: &Url, region: Option<String>) -> Result<(Box<dyn ObjectStore>, Path)> {
        let (scheme, path) = ObjectStoreScheme::parse(url)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // Credentials come from the standard AWS_* environment variables.
                let mut builder = AmazonS3Builder::from_env().with_url(url.to_string());
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }

                // For supporting localstack/minio for testing
                if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
                    if endpoint.starts_with("http://") {
                        builder = builder.with_allow_http(true);
                    }
                    builder = builder.with_endpoint(endpoint);
                }
                Ok((Box::new(builder.build()?), path))
            }
            _ => Ok(parse_url(url)?),
        }
    }

    pub fn get_url(&self) -> &str {
        self.url.as_str()
    }

    fn object_path(&self, key: &str) -> Path {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.prefix.clone(), |path, part| path.child(part))
    }

    // The local filesystem backend refuses object attributes.
    fn supports_attributes(&self) -> bool {
        !matches!(self.scheme, ObjectStoreScheme::Local)
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let location = self.object_path(key);
        let result = self
            .object_store
            .get(&location)
            .await
            .map_err(|e| anyhow!("can't get object {:?}: {:?}", location, e))?;
        Ok(result.bytes().await?)
    }
}

#[async_trait]
impl StorageGateway for BlobStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), GatewayError> {
        let timer_kvs = &[KeyValue::new("op", "put")];
        let _timer = Timer::start_with_labels(&self.metrics.operations, timer_kvs);

        let location = self.object_path(key);
        let mut options = PutOptions::from(PutMode::Create);
        if self.supports_attributes() {
            options
                .attributes
                .insert(Attribute::ContentType, content_type.to_string().into());
        }
        debug!(%location, size = data.len(), "writing object");
        self.object_store
            .put_opts(&location, PutPayload::from(data), options)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), GatewayError> {
        let timer_kvs = &[KeyValue::new("op", "delete")];
        let _timer = Timer::start_with_labels(&self.metrics.operations, timer_kvs);

        for key in keys {
            let location = self.object_path(key);
            match self.object_store.delete(&location).await {
                Ok(()) => {}
                Err(object_store::Error::NotFound { .. }) => {
                    debug!(%location, "object already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> Result<String, GatewayError> {
        if let Some(base) = &self.public_base_url {
            return Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                key.trim_start_matches('/')
            ));
        }
        let location = self.object_path(key);
        match self.scheme {
            ObjectStoreScheme::Local => Ok(format!("file:///{}", location)),
            ObjectStoreScheme::AmazonS3 => {
                let bucket = self
                    .url
                    .host_str()
                    .ok_or_else(|| GatewayError::NoPublicUrl(key.to_string()))?;
                Ok(format!("https://{}.s3.amazonaws.com/{}", bucket, location))
            }
            _ => Err(GatewayError::NoPublicUrl(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_storage(public_base_url: Option<&str>) -> BlobStorage {
        BlobStorage::new(BlobStorageConfig {
            path: "memory:///".to_string(),
            region: None,
            public_base_url: public_base_url.map(str::to_string),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_read() -> Result<()> {
        let storage = memory_storage(None);
        storage
            .put("uploads/abc_hello.txt", Bytes::from_static(b"hello"), "text/plain")
            .await?;
        let bytes = storage.read_bytes("uploads/abc_hello.txt").await?;
        assert_eq!(bytes, Bytes::from_static(b"hello"));
        Ok(())
    }

    #[tokio::test]
    async fn test_put_does_not_overwrite() -> Result<()> {
        let storage = memory_storage(None);
        storage
            .put("uploads/same.txt", Bytes::from_static(b"first"), "text/plain")
            .await?;
        let err = storage
            .put("uploads/same.txt", Bytes::from_static(b"second"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)), "{err:?}");
        assert_eq!(
            storage.read_bytes("uploads/same.txt").await?,
            Bytes::from_static(b"first")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() -> Result<()> {
        let storage = memory_storage(None);
        storage
            .put("uploads/gone.bin", Bytes::from_static(b"x"), "application/octet-stream")
            .await?;
        storage.delete(&["uploads/gone.bin".to_string()]).await?;
        storage.delete(&["uploads/gone.bin".to_string()]).await?;
        assert!(storage.read_bytes("uploads/gone.bin").await.is_err());
        Ok(())
    }

    #[test]
    fn test_public_url_uses_configured_base() {
        let storage = memory_storage(Some("https://cdn.example.com/files/"));
        assert_eq!(
            storage.public_url("uploads/a_b.txt").unwrap(),
            "https://cdn.example.com/files/uploads/a_b.txt"
        );
    }

    #[test]
    fn test_memory_store_has_no_public_url() {
        let storage = memory_storage(None);
        assert!(matches!(
            storage.public_url("uploads/a.txt"),
            Err(GatewayError::NoPublicUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_local_store_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = BlobStorage::new(BlobStorageConfig {
            path: format!("file://{}", dir.path().to_str().unwrap()),
            region: None,
            public_base_url: None,
        })?;
        storage
            .put("uploads/doc.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await?;
        let url = storage.public_url("uploads/doc.pdf")?;
        assert!(url.starts_with("file:///"), "{url}");
        assert!(url.ends_with("uploads/doc.pdf"), "{url}");
        assert!(dir.path().join("uploads/doc.pdf").exists());
        Ok(())
    }
}
