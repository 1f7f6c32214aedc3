//! Error types for the storage layer.

use billing_buffer_core::EntryId;

use crate::types::EntryStatus;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A record with the same key already exists.
    #[error("record already exists: {0}")]
    AlreadyExists(String),

    /// The record was modified by another writer since it was read.
    #[error("version conflict on entry {id}: expected version {expected}, found {found}")]
    Conflict {
        /// The entry being written.
        id: EntryId,
        /// The version the writer read.
        expected: u64,
        /// The version currently stored.
        found: u64,
    },

    /// The save would move the entry's status backwards.
    #[error("invalid status transition for entry {id}: {from} -> {to}")]
    InvalidTransition {
        /// The entry being written.
        id: EntryId,
        /// The status currently stored.
        from: EntryStatus,
        /// The status the writer tried to store.
        to: EntryStatus,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if the write lost a race and may succeed after re-reading.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
