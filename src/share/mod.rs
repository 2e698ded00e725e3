use std::sync::Arc;

use blob_store::StorageGateway;
use data_model::{ShareEntry, ShareId};
use metrics::{api_io_stats, AutoIncrement};
use opentelemetry::KeyValue;
use state_store::ShareRegistry;
use tracing::{error, info, warn};

use crate::error::ShareError;

pub mod qr;

/// Builds the externally visible link for a share id.
#[derive(Debug, Clone)]
pub struct ShareLinks {
    base_url: String,
}

impl ShareLinks {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn share_url(&self, share_id: &ShareId) -> String {
        format!("{}/{}", self.base_url, share_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDetails {
    pub share_url: String,
    pub public_url: Option<String>,
    pub filename: String,
    pub created_at: u64,
}

/// Read and delete paths over the share registry.
pub struct ShareResolver {
    registry: Arc<dyn ShareRegistry>,
    gateway: Arc<dyn StorageGateway>,
    links: ShareLinks,
    metrics: Arc<api_io_stats::Metrics>,
}

impl ShareResolver {
    pub fn new(
        registry: Arc<dyn ShareRegistry>,
        gateway: Arc<dyn StorageGateway>,
        links: ShareLinks,
        metrics: Arc<api_io_stats::Metrics>,
    ) -> Self {
        Self {
            registry,
            gateway,
            links,
            metrics,
        }
    }

    fn lookup(&self, share_id: &str, op: &'static str) -> Result<ShareEntry, ShareError> {
        self.metrics
            .share_lookups
            .increment(&[KeyValue::new("op", op)]);
        self.registry.get(share_id)?.ok_or(ShareError::NotFound)
    }

    pub fn describe(&self, share_id: &str) -> Result<ShareDetails, ShareError> {
        let entry = self.lookup(share_id, "describe")?;
        Ok(ShareDetails {
            share_url: self.links.share_url(&entry.share_id),
            public_url: entry.public_url,
            filename: entry.original_filename,
            created_at: entry.created_at,
        })
    }

    /// Public URL to redirect to. A share without one is reported as
    /// missing.
    pub fn resolve(&self, share_id: &str) -> Result<String, ShareError> {
        self.lookup(share_id, "resolve")?
            .public_url
            .ok_or(ShareError::NotFound)
    }

    /// PNG QR code of the share link (not of the storage URL).
    pub fn qr_code(&self, share_id: &str) -> Result<Vec<u8>, ShareError> {
        let entry = self.lookup(share_id, "qr_code")?;
        qr::render_png(&self.links.share_url(&entry.share_id))
            .map_err(|e| ShareError::Unexpected(e.to_string()))
    }

    /// Removes the stored object, then the registry entry. The intent is
    /// recorded first so a crash in between is finished by
    /// [`ShareResolver::recover_pending_deletes`]. If storage refuses the
    /// delete the entry stays live, still marked while other deletes of the
    /// same id are running.
    pub async fn delete(&self, share_id: &str) -> Result<ShareEntry, ShareError> {
        let entry = self
            .registry
            .begin_delete(share_id)?
            .ok_or(ShareError::NotFound)?;

        if let Err(e) = self
            .gateway
            .delete(&[entry.storage_path.clone()])
            .await
        {
            error!(%share_id, storage_path = %entry.storage_path, "failed to delete object: {}", e);
            if let Err(abort_error) = self.registry.abort_delete(share_id) {
                error!(%share_id, "failed to clear pending delete: {}", abort_error);
            }
            return Err(e.into());
        }

        // a concurrent delete of the same id may have removed it already
        self.registry.remove(share_id)?;
        self.metrics.share_deletes.increment(&[]);
        info!(%share_id, storage_path = %entry.storage_path, "share deleted");
        Ok(entry)
    }

    /// Finishes deletes interrupted by a restart. Returns how many were
    /// completed; entries whose object still can't be deleted stay marked.
    pub async fn recover_pending_deletes(&self) -> Result<usize, ShareError> {
        let mut recovered = 0;
        for entry in self.registry.pending_deletes()? {
            let share_id = entry.key();
            match self.gateway.delete(&[entry.storage_path.clone()]).await {
                Ok(()) => {
                    self.registry.remove(share_id)?;
                    recovered += 1;
                }
                Err(e) => {
                    warn!(%share_id, "pending delete still failing: {}", e);
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "finished interrupted share deletes");
        }
        Ok(recovered)
    }

    pub fn share_count(&self) -> Result<usize, ShareError> {
        Ok(self.registry.len()?)
    }
}
