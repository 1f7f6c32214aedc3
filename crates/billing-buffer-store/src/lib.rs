//! `RocksDB` storage layer for the billing project buffer.
//!
//! This crate provides persistent storage for pool entries using `RocksDB`
//! with column families for efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `entries`: Primary entry records, keyed by `entry_id`
//! - `entries_by_status`: Index for listing and counting entries by status
//! - `entries_by_tier_status`: Index for per-tier lookups and counts
//! - `entries_by_name`: Index from external resource name to `entry_id`
//!
//! Every save is checked against the stored `version`, so two writers that
//! read the same row cannot silently overwrite each other.
//!
//! # Example
//!
//! ```no_run
//! use billing_buffer_store::{EntryStatus, RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/billing-buffer-db").unwrap();
//!
//! // Count ready entries for a tier
//! let tier = "registered".parse().unwrap();
//! let available = store
//!     .count_by_status_and_tier(EntryStatus::Available, &tier)
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

use std::collections::BTreeMap;

use billing_buffer_core::{EntryId, ResourceName, Tier};
use chrono::{DateTime, Utc};

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{EntryStatus, PoolEntry};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new entry.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the ID or resource name is taken.
    fn insert_entry(&self, entry: &PoolEntry) -> Result<()>;

    /// Save an existing entry, checking and bumping its version.
    ///
    /// On success `entry.version` is incremented to match the stored record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the entry doesn't exist,
    /// `StoreError::Conflict` if it was saved by someone else since it was read,
    /// or `StoreError::InvalidTransition` if the stored status cannot move to
    /// the new one. Saving without a status change is always allowed.
    fn save_entry(&self, entry: &mut PoolEntry) -> Result<()>;

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry(&self, entry_id: &EntryId) -> Result<Option<PoolEntry>>;

    /// Get an entry by its external resource name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_entry_by_resource_name(&self, name: &ResourceName) -> Result<Option<PoolEntry>>;

    /// Find the `Available` entry in a tier with the earliest creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_oldest_available(&self, tier: &Tier) -> Result<Option<PoolEntry>>;

    /// List up to `limit` entries with a status, least recently polled first.
    ///
    /// Entries that were never polled come before all others.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_by_status_oldest_sync_first(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<PoolEntry>>;

    /// List entries with a status whose last status change is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_by_status_changed_before(
        &self,
        status: EntryStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PoolEntry>>;

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Count entries with a status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_by_status(&self, status: EntryStatus) -> Result<u64>;

    /// Count entries with a status in one tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_by_status_and_tier(&self, status: EntryStatus, tier: &Tier) -> Result<u64>;

    /// Count entries for every status, including zero counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn count_by_status_map(&self) -> Result<BTreeMap<EntryStatus, u64>> {
        EntryStatus::ALL
            .into_iter()
            .map(|status| Ok((status, self.count_by_status(status)?)))
            .collect()
    }
}
