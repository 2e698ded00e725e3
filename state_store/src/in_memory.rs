use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use data_model::ShareEntry;

use crate::{RegistryError, ShareRegistry};

/// Process-local registry. Entries are sharded so lookups do not wait on
/// writes to unrelated ids.
#[derive(Default)]
pub struct InMemoryShareRegistry {
    shares: DashMap<String, ShareEntry>,
    retired: DashSet<String>,
}

impl InMemoryShareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, share_id: &str, change: impl FnOnce(&mut ShareEntry)) -> Option<ShareEntry> {
        let mut entry = self.shares.get_mut(share_id)?;
        change(entry.value_mut());
        Some(entry.value().clone())
    }
}

impl ShareRegistry for InMemoryShareRegistry {
    fn insert(&self, entry: ShareEntry) -> Result<(), RegistryError> {
        let key = entry.key().to_string();
        match self.shares.entry(key) {
            Entry::Occupied(occupied) => Err(RegistryError::Conflict(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                // `remove` retires before it drops the entry, so checking
                // here under the shard lock can't miss a concurrent delete.
                if self.retired.contains(vacant.key()) {
                    return Err(RegistryError::Conflict(vacant.key().clone()));
                }
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    fn get(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        Ok(self.shares.get(share_id).map(|entry| entry.value().clone()))
    }

    fn begin_delete(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        Ok(self.update(share_id, ShareEntry::mark_delete_started))
    }

    fn abort_delete(&self, share_id: &str) -> Result<(), RegistryError> {
        self.update(share_id, ShareEntry::mark_delete_aborted);
        Ok(())
    }

    fn remove(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        if !self.shares.contains_key(share_id) {
            return Ok(None);
        }
        self.retired.insert(share_id.to_string());
        Ok(self.shares.remove(share_id).map(|(_, entry)| entry))
    }

    fn pending_deletes(&self) -> Result<Vec<ShareEntry>, RegistryError> {
        Ok(self
            .shares
            .iter()
            .filter(|entry| entry.pending_delete)
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.shares.len())
    }
}
