use std::{net::SocketAddr, path::Path, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use state_store::ShareRegistryConfig;
use url::Url;
use uuid::Uuid;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "FILESHARE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub env: String,
    pub listen_addr: String,
    /// Prefix of the links handed to clients; a share resolves at
    /// `<share_base_url>/<share_id>`.
    pub share_base_url: String,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
    #[serde(default)]
    pub registry: ShareRegistryConfig,
    #[serde(default)]
    pub limits: UploadLimits,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            listen_addr: "0.0.0.0:8900".to_string(),
            share_base_url: "http://localhost:8900/s".to_string(),
            blob_storage: Default::default(),
            registry: Default::default(),
            limits: Default::default(),
            cors_allowed_origins: Vec::new(),
            telemetry: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadLimits {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Read size used while streaming a body.
    pub chunk_size: usize,
    pub max_batch_files: usize,
    /// Uploads of one batch that may talk to storage at the same time.
    pub max_concurrent_uploads: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        UploadLimits {
            max_file_size: 49 * 1024 * 1024,
            chunk_size: 1024 * 1024,
            max_batch_files: 20,
            max_concurrent_uploads: 5,
        }
    }
}

impl ServerConfig {
    /// Layers defaults, the optional YAML file and `FILESHARE_*` environment
    /// variables, in that order. Nested keys use `__`, e.g.
    /// `FILESHARE_LIMITS__MAX_FILE_SIZE`.
    pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow!("config file not found: {}", path.display()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    #[cfg(test)]
    fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        Self::extract(
            Figment::from(Serialized::defaults(ServerConfig::default()))
                .merge(Yaml::string(config_str)),
        )
    }

    fn extract(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        if self.share_base_url.parse::<Url>().is_err() {
            return Err(anyhow!("invalid share base url: {}", self.share_base_url));
        }
        let limits = &self.limits;
        if limits.max_file_size == 0 ||
            limits.chunk_size == 0 ||
            limits.max_batch_files == 0 ||
            limits.max_concurrent_uploads == 0
        {
            return Err(anyhow!("upload limits must be positive: {:?}", limits));
        }
        if limits.chunk_size as u64 > limits.max_file_size {
            return Err(anyhow!(
                "chunk size {} is larger than the maximum file size {}",
                limits.chunk_size,
                limits.max_file_size
            ));
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.env, Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    // Enable metrics.
    #[serde(default)]
    pub enable_metrics: bool,
    // Export traces over OTLP.
    #[serde(default)]
    pub enable_tracing: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Defaults to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317 when empty.
    #[serde(default)]
    pub endpoint: Option<String>,
    // Metrics export interval. Defaults to 10 seconds.
    #[serde(with = "duration_serde", default = "default_metrics_interval")]
    pub metrics_interval: Duration,
    // Used as the "fileshare.instance.id" metric attribute.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            enable_tracing: false,
            endpoint: None,
            metrics_interval: default_metrics_interval(),
            instance_id: None,
        }
    }
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(10)
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
