use std::{
    path::PathBuf,
    sync::atomic::{AtomicI64, Ordering},
};

use data_model::ShareEntry;
use rocksdb::{
    ColumnFamily,
    ColumnFamilyDescriptor,
    Error as RocksDBError,
    IteratorMode,
    Options as RocksDBOptions,
    TransactionDB,
    TransactionDBOptions,
};
use tracing::info;

use crate::{RegistryError, ShareRegistry};

const SHARES_CF: &str = "shares";
const RETIRED_CF: &str = "retired_share_ids";

impl From<RocksDBError> for RegistryError {
    fn from(source: RocksDBError) -> Self {
        RegistryError::Storage(source.to_string())
    }
}

/// Registry persisted in RocksDB. Live entries are JSON values keyed by share
/// id; retired ids are kept in their own column family so they survive
/// restarts as well.
pub struct RocksDBShareRegistry {
    db: TransactionDB,
    /// Live entries, counted once on open and kept current after each
    /// commit. A remove can land before the matching increment, so reads
    /// clamp at zero.
    share_count: AtomicI64,
}

impl RocksDBShareRegistry {
    pub fn open(path: PathBuf) -> Result<Self, RegistryError> {
        let mut db_opts = RocksDBOptions::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);

        let column_families = [SHARES_CF, RETIRED_CF]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, RocksDBOptions::default()))
            .collect::<Vec<_>>();

        let db = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            &path,
            column_families,
        )?;

        let mut registry = Self {
            db,
            share_count: AtomicI64::new(0),
        };
        let share_count = registry.count_shares()?;
        *registry.share_count.get_mut() = share_count as i64;
        info!(path = %path.display(), share_count, "opened share registry");

        Ok(registry)
    }

    fn count_shares(&self) -> Result<usize, RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        let mut count = 0;
        for item in self.db.iterator_cf(shares, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn column_family(&self, name: &str) -> Result<&ColumnFamily, RegistryError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RegistryError::Storage(format!("missing column family {}", name)))
    }

    fn decode(bytes: &[u8]) -> Result<ShareEntry, RegistryError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn update(
        &self,
        share_id: &str,
        change: impl FnOnce(&mut ShareEntry),
    ) -> Result<Option<ShareEntry>, RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        let tx = self.db.transaction();
        let Some(bytes) = tx.get_for_update_cf(shares, share_id, true)? else {
            return Ok(None);
        };
        let mut entry = Self::decode(&bytes)?;
        change(&mut entry);
        tx.put_cf(shares, share_id, serde_json::to_vec(&entry)?)?;
        tx.commit()?;
        Ok(Some(entry))
    }
}

impl ShareRegistry for RocksDBShareRegistry {
    fn insert(&self, entry: ShareEntry) -> Result<(), RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        let retired = self.column_family(RETIRED_CF)?;
        let key = entry.key();

        let tx = self.db.transaction();
        if tx.get_for_update_cf(shares, key, true)?.is_some() ||
            tx.get_for_update_cf(retired, key, true)?.is_some()
        {
            return Err(RegistryError::Conflict(key.to_string()));
        }
        tx.put_cf(shares, key, serde_json::to_vec(&entry)?)?;
        tx.commit()?;
        self.share_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        self.db
            .get_cf(shares, share_id)?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn begin_delete(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        self.update(share_id, ShareEntry::mark_delete_started)
    }

    fn abort_delete(&self, share_id: &str) -> Result<(), RegistryError> {
        self.update(share_id, ShareEntry::mark_delete_aborted)?;
        Ok(())
    }

    fn remove(&self, share_id: &str) -> Result<Option<ShareEntry>, RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        let retired = self.column_family(RETIRED_CF)?;

        let tx = self.db.transaction();
        let Some(bytes) = tx.get_for_update_cf(shares, share_id, true)? else {
            return Ok(None);
        };
        let entry = Self::decode(&bytes)?;
        tx.delete_cf(shares, share_id)?;
        tx.put_cf(retired, share_id, b"")?;
        tx.commit()?;
        self.share_count.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(entry))
    }

    fn pending_deletes(&self) -> Result<Vec<ShareEntry>, RegistryError> {
        let shares = self.column_family(SHARES_CF)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(shares, IteratorMode::Start) {
            let (_, value) = item?;
            let entry = Self::decode(&value)?;
            if entry.pending_delete {
                pending.push(entry);
            }
        }
        Ok(pending)
    }

    fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.share_count.load(Ordering::SeqCst).max(0) as usize)
    }
}
