//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions to encode and decode keys for the entry
//! indexes. All index keys end with the 16 entry ID bytes so the ID can be
//! recovered from any of them, and all are designed for prefix scans.

use billing_buffer_core::{EntryId, ResourceName, Tier};

/// Length of an encoded entry ID.
pub const ENTRY_ID_LEN: usize = 16;

/// Encode an entry key (just the entry ID bytes).
#[must_use]
pub fn entry_key(entry_id: &EntryId) -> Vec<u8> {
    entry_id.as_bytes().to_vec()
}

/// Encode a status-entry index key: `status || entry_id`.
#[must_use]
pub fn status_entry_key(status: u8, entry_id: &EntryId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + ENTRY_ID_LEN);
    key.push(status);
    key.extend_from_slice(entry_id.as_bytes());
    key
}

/// Encode a status prefix for scanning all entries with a status.
#[must_use]
pub fn status_prefix(status: u8) -> Vec<u8> {
    vec![status]
}

/// Encode a tier-status prefix: `len(tier) || tier || status`.
///
/// The tier is length-prefixed so that one tier name can never be a key
/// prefix of another (e.g. `reg` and `registered`).
#[must_use]
pub fn tier_status_prefix(tier: &Tier, status: u8) -> Vec<u8> {
    let tier_bytes = tier.as_str().as_bytes();
    let mut key = Vec::with_capacity(2 + tier_bytes.len() + ENTRY_ID_LEN);
    // Tier names are capped at 64 bytes, so the length always fits in a u8.
    key.push(u8::try_from(tier_bytes.len()).unwrap_or(u8::MAX));
    key.extend_from_slice(tier_bytes);
    key.push(status);
    key
}

/// Encode a tier-status-entry index key: `len(tier) || tier || status || entry_id`.
#[must_use]
pub fn tier_status_entry_key(tier: &Tier, status: u8, entry_id: &EntryId) -> Vec<u8> {
    let mut key = tier_status_prefix(tier, status);
    key.extend_from_slice(entry_id.as_bytes());
    key
}

/// Encode a resource name key.
#[must_use]
pub fn name_key(name: &ResourceName) -> Vec<u8> {
    name.as_str().as_bytes().to_vec()
}

/// Extract the entry ID from the trailing bytes of an index key or value.
///
/// Returns `None` if the slice is shorter than an entry ID.
#[must_use]
pub fn extract_trailing_entry_id(key: &[u8]) -> Option<EntryId> {
    let start = key.len().checked_sub(ENTRY_ID_LEN)?;
    let bytes: [u8; ENTRY_ID_LEN] = key[start..].try_into().ok()?;
    Some(EntryId::from_bytes(bytes))
}
