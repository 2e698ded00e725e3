pub mod test_objects;

use std::fmt::{self, Display};

use anyhow::{anyhow, Result};
use derive_builder::Builder;
use fileshare_utils::get_monotonic_epoch_time_in_ms;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest. 32 bits of entropy keeps
/// the birthday bound around 65k live shares for a 50% collision chance, so
/// registries enforce uniqueness and callers retry on conflict.
pub const SHARE_ID_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShareId(String);

impl ShareId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Hashes a fresh random token and keeps the first [`SHARE_ID_LEN`] hex
    /// characters. The result says nothing about the stored object.
    pub fn generate() -> Self {
        let token = uuid::Uuid::new_v4();
        let digest = Sha256::digest(token.as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(SHARE_ID_LEN);
        Self(id)
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShareId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Metadata for one stored object reachable through a share link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
#[builder(build_fn(skip))]
pub struct ShareEntry {
    pub share_id: ShareId,
    pub storage_path: String,
    /// Name as the client sent it, only used for display.
    pub original_filename: String,
    pub public_url: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: u64,
    /// Set while a delete is in flight against the storage backend.
    #[serde(default)]
    pub pending_delete: bool,
    /// Deletes currently running for this entry. The pending mark is only
    /// cleared once none are left.
    #[serde(default)]
    pub deletes_in_flight: u32,
}

impl ShareEntry {
    pub fn key(&self) -> &str {
        self.share_id.get()
    }

    pub fn mark_delete_started(&mut self) {
        self.deletes_in_flight = self.deletes_in_flight.saturating_add(1);
        self.pending_delete = true;
    }

    pub fn mark_delete_aborted(&mut self) {
        self.deletes_in_flight = self.deletes_in_flight.saturating_sub(1);
        self.pending_delete = self.deletes_in_flight > 0;
    }
}

impl ShareEntryBuilder {
    pub fn build(&mut self) -> Result<ShareEntry> {
        let share_id = self
            .share_id
            .clone()
            .ok_or(anyhow!("share_id is required"))?;
        let storage_path = self
            .storage_path
            .clone()
            .ok_or(anyhow!("storage_path is required"))?;
        let original_filename = self
            .original_filename
            .clone()
            .ok_or(anyhow!("original_filename is required"))?;
        let content_type = self
            .content_type
            .clone()
            .ok_or(anyhow!("content_type is required"))?;
        let size_bytes = self.size_bytes.ok_or(anyhow!("size_bytes is required"))?;
        Ok(ShareEntry {
            share_id,
            storage_path,
            original_filename,
            public_url: self.public_url.clone().flatten(),
            content_type,
            size_bytes,
            created_at: get_monotonic_epoch_time_in_ms(),
            pending_delete: false,
            deletes_in_flight: 0,
        })
    }
}
