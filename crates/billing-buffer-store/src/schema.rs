//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary pool entry records, keyed by `entry_id`.
    pub const ENTRIES: &str = "entries";

    /// Index: entries by status, keyed by `status || entry_id`.
    pub const ENTRIES_BY_STATUS: &str = "entries_by_status";

    /// Index: entries by tier and status, keyed by `len(tier) || tier || status || entry_id`.
    pub const ENTRIES_BY_TIER_STATUS: &str = "entries_by_tier_status";

    /// Index: external resource name to `entry_id`.
    pub const ENTRIES_BY_NAME: &str = "entries_by_name";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ENTRIES,
        cf::ENTRIES_BY_STATUS,
        cf::ENTRIES_BY_TIER_STATUS,
        cf::ENTRIES_BY_NAME,
    ]
}
