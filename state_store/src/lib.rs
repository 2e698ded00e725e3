//! Registry of live share links.
//!
//! Every entry points at an object that the storage backend accepted. Share
//! ids are never handed out twice: once removed, an id is retired and
//! inserting it again fails with [`RegistryError::Conflict`].
//!
//! Deletes run in two phases so that a crash between the storage delete and
//! the registry update leaves a recoverable trace:
//! [`ShareRegistry::begin_delete`] records the intent,
//! [`ShareRegistry::remove`] finishes it and [`ShareRegistry::abort_delete`]
//! rolls it back. [`ShareRegistry::pending_deletes`] lists unfinished ones.

use std::{env, sync::Arc};

use anyhow::Result;
use data_model::ShareEntry;
use serde::{Deserialize, Serialize};

pub mod in_memory;
pub mod rocksdb;

pub use self::{in_memory::InMemoryShareRegistry, rocksdb::RocksDBShareRegistry};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("share id {0} is already in use or retired")]
    Conflict(String),

    #[error("registry storage error: {0}")]
    Storage(String),

    #[error("failed to encode share entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait ShareRegistry: Send + Sync {
    /// Adds an entry. Fails with `Conflict` when the id is live or retired.
    fn insert(&self, entry: ShareEntry) -> Result<(), RegistryError>;

    fn get(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError>;

    /// Marks the entry as being deleted and returns it. Overlapping calls
    /// for the same id are counted.
    fn begin_delete(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError>;

    /// Withdraws one `begin_delete`. The mark is cleared when no delete is
    /// left in flight.
    fn abort_delete(&self, share_id: &str) -> Result<(), RegistryError>;

    /// Drops the entry and retires its id.
    fn remove(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError>;

    fn pending_deletes(&self) -> Result<Vec<ShareEntry>, RegistryError>;

    fn len(&self) -> Result<usize, RegistryError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ShareRegistryConfig {
    /// Lost on restart; meant for tests and throwaway deployments.
    InMemory,
    #[serde(rename = "rocksdb")]
    RocksDB {
        #[serde(default = "default_registry_path")]
        path: String,
    },
}

impl Default for ShareRegistryConfig {
    fn default() -> Self {
        ShareRegistryConfig::RocksDB {
            path: default_registry_path(),
        }
    }
}

impl ShareRegistryConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            ShareRegistryConfig::InMemory => "in_memory",
            ShareRegistryConfig::RocksDB { .. } => "rocksdb",
        }
    }
}

fn default_registry_path() -> String {
    env::current_dir()
        .expect("unable to get current directory")
        .join("fileshare_storage/registry")
        .to_str()
        .expect("unable to get path as string")
        .to_string()
}

pub fn open_registry(config: &ShareRegistryConfig) -> Result<Arc<dyn ShareRegistry>> {
    match config {
        ShareRegistryConfig::InMemory => Ok(Arc::new(InMemoryShareRegistry::new())),
        ShareRegistryConfig::RocksDB { path } => {
            Ok(Arc::new(RocksDBShareRegistry::open(path.parse()?)?))
        }
    }
}
