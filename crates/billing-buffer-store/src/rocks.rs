//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use billing_buffer_core::{EntryId, ResourceName, Tier};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{EntryStatus, PoolEntry};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-check-write sequences for inserts and versioned saves.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Collect the entry IDs of every index key under `prefix`.
    fn scan_ids(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<EntryId>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }

            if let Some(id) = keys::extract_trailing_entry_id(&key) {
                ids.push(id);
            }
        }

        Ok(ids)
    }

    /// Count the index keys under `prefix`.
    fn count_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<u64> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut count = 0u64;
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(prefix) {
                break;
            }

            count += 1;
        }

        Ok(count)
    }

    /// Load the entries for a list of IDs, skipping any that vanished.
    fn load_entries(&self, ids: &[EntryId]) -> Result<Vec<PoolEntry>> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.get_entry(id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn list_by_status(&self, status: EntryStatus) -> Result<Vec<PoolEntry>> {
        let ids = self.scan_ids(cf::ENTRIES_BY_STATUS, &keys::status_prefix(status.as_u8()))?;
        self.load_entries(&ids)
    }

    /// Write an entry and bring every index in line with it.
    ///
    /// `previous` is the currently stored version of the entry, if any.
    fn write_entry(&self, previous: Option<&PoolEntry>, entry: &PoolEntry) -> Result<()> {
        let cf_entries = self.cf(cf::ENTRIES)?;
        let cf_by_status = self.cf(cf::ENTRIES_BY_STATUS)?;
        let cf_by_tier_status = self.cf(cf::ENTRIES_BY_TIER_STATUS)?;
        let cf_by_name = self.cf(cf::ENTRIES_BY_NAME)?;

        let status = entry.status.as_u8();
        let value = Self::serialize(entry)?;

        let mut batch = WriteBatch::default();

        // Drop stale index keys if the indexed fields changed
        if let Some(old) = previous {
            if old.status != entry.status || old.tier != entry.tier {
                batch.delete_cf(
                    &cf_by_status,
                    keys::status_entry_key(old.status.as_u8(), &old.id),
                );
                batch.delete_cf(
                    &cf_by_tier_status,
                    keys::tier_status_entry_key(&old.tier, old.status.as_u8(), &old.id),
                );
            }
            if old.resource_name != entry.resource_name {
                batch.delete_cf(&cf_by_name, keys::name_key(&old.resource_name));
            }
        }

        batch.put_cf(&cf_entries, keys::entry_key(&entry.id), &value);
        batch.put_cf(&cf_by_status, keys::status_entry_key(status, &entry.id), []);
        batch.put_cf(
            &cf_by_tier_status,
            keys::tier_status_entry_key(&entry.tier, status, &entry.id),
            [],
        );
        batch.put_cf(
            &cf_by_name,
            keys::name_key(&entry.resource_name),
            entry.id.as_bytes(),
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Writes
    // =========================================================================

    fn insert_entry(&self, entry: &PoolEntry) -> Result<()> {
        let _guard = self.write_lock.lock();

        if self.get_entry(&entry.id)?.is_some() {
            return Err(StoreError::AlreadyExists(entry.id.to_string()));
        }
        if self
            .get_entry_by_resource_name(&entry.resource_name)?
            .is_some()
        {
            return Err(StoreError::AlreadyExists(entry.resource_name.to_string()));
        }

        self.write_entry(None, entry)?;

        tracing::trace!(entry_id = %entry.id, status = %entry.status, "Inserted entry");

        Ok(())
    }

    fn save_entry(&self, entry: &mut PoolEntry) -> Result<()> {
        let _guard = self.write_lock.lock();

        let stored = self.get_entry(&entry.id)?.ok_or(StoreError::NotFound)?;
        if stored.version != entry.version {
            return Err(StoreError::Conflict {
                id: entry.id,
                expected: entry.version,
                found: stored.version,
            });
        }
        if stored.status != entry.status && !stored.status.can_transition_to(entry.status) {
            return Err(StoreError::InvalidTransition {
                id: entry.id,
                from: stored.status,
                to: entry.status,
            });
        }

        let mut next = entry.clone();
        next.version += 1;
        self.write_entry(Some(&stored), &next)?;
        *entry = next;

        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<PoolEntry>> {
        let cf = self.cf(cf::ENTRIES)?;
        let key = keys::entry_key(entry_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn get_entry_by_resource_name(&self, name: &ResourceName) -> Result<Option<PoolEntry>> {
        let cf = self.cf(cf::ENTRIES_BY_NAME)?;

        let id = self
            .db
            .get_cf(&cf, keys::name_key(name))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .and_then(|value| keys::extract_trailing_entry_id(&value));

        match id {
            Some(id) => self.get_entry(&id),
            None => Ok(None),
        }
    }

    fn find_oldest_available(&self, tier: &Tier) -> Result<Option<PoolEntry>> {
        let prefix = keys::tier_status_prefix(tier, EntryStatus::Available.as_u8());
        let ids = self.scan_ids(cf::ENTRIES_BY_TIER_STATUS, &prefix)?;

        Ok(self
            .load_entries(&ids)?
            .into_iter()
            // The index may briefly disagree with a concurrent write
            .filter(|e| e.status == EntryStatus::Available)
            .min_by(|a, b| {
                a.creation_time
                    .cmp(&b.creation_time)
                    .then_with(|| a.id.cmp(&b.id))
            }))
    }

    fn list_by_status_oldest_sync_first(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<PoolEntry>> {
        let mut entries = self.list_by_status(status)?;

        // `None` sorts before `Some`, so never-polled entries come first
        entries.sort_by(|a, b| {
            a.last_sync_request_time
                .cmp(&b.last_sync_request_time)
                .then_with(|| a.creation_time.cmp(&b.creation_time))
        });
        entries.truncate(limit);

        Ok(entries)
    }

    fn list_by_status_changed_before(
        &self,
        status: EntryStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PoolEntry>> {
        Ok(self
            .list_by_status(status)?
            .into_iter()
            .filter(|e| e.status == status && e.last_status_changed_time < cutoff)
            .collect())
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn count_by_status(&self, status: EntryStatus) -> Result<u64> {
        self.count_prefix(cf::ENTRIES_BY_STATUS, &keys::status_prefix(status.as_u8()))
    }

    fn count_by_status_and_tier(&self, status: EntryStatus, tier: &Tier) -> Result<u64> {
        self.count_prefix(
            cf::ENTRIES_BY_TIER_STATUS,
            &keys::tier_status_prefix(tier, status.as_u8()),
        )
    }
}
