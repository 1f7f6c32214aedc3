//! Error types for the buffer pool.
//!
//! `ProvisionError` covers calls to the external provisioning service;
//! `PoolError` is what every pool operation returns.

use billing_buffer_core::{EntryId, IdError, ResourceName, Tier};
use billing_buffer_store::{EntryStatus, StoreError};
use thiserror::Error;

/// A result type using `PoolError`.
pub type Result<T> = std::result::Result<T, PoolError>;

/// A result type using `ProvisionError`.
pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;

/// Errors returned by the external provisioning service client.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The provisioning service does not know the resource.
    #[error("resource not found: {0}")]
    NotFound(ResourceName),

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("provisioning service rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code returned by the service.
        status: u16,
        /// Error message from the response body, if any.
        message: String,
    },

    /// The response body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors that can occur in buffer pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No `Available` entry exists for the tier right now.
    #[error("no available entries in tier {tier}")]
    EmptyPool {
        /// The tier that was asked for.
        tier: Tier,
    },

    /// The tier is not part of the configured pool.
    #[error("unknown tier: {0}")]
    UnknownTier(Tier),

    /// The requested status change is not allowed.
    #[error("invalid status transition for entry {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The entry being transitioned.
        id: EntryId,
        /// The current status.
        from: EntryStatus,
        /// The requested target status.
        to: EntryStatus,
    },

    /// A call to the provisioning service failed.
    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisionError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A generated identifier was rejected.
    #[error("invalid identifier: {0}")]
    Identifier(#[from] IdError),

    /// The pool configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::EmptyPool { .. } => 503,
            Self::UnknownTier(_) | Self::Store(StoreError::NotFound) => 404,
            Self::InvalidTransition { .. }
            | Self::Store(StoreError::Conflict { .. } | StoreError::InvalidTransition { .. }) => {
                409
            }
            Self::Provisioning(_) => 502,
            Self::Store(_) | Self::Identifier(_) | Self::InvalidConfig(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::EmptyPool { .. }
                | Self::Provisioning(_)
                | Self::Store(StoreError::Conflict { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier() -> Tier {
        "registered".parse().unwrap()
    }

    #[test]
    fn error_status_codes() {
        let id = EntryId::generate();

        assert_eq!(PoolError::EmptyPool { tier: tier() }.http_status_code(), 503);
        assert_eq!(PoolError::UnknownTier(tier()).http_status_code(), 404);
        assert_eq!(
            PoolError::InvalidTransition {
                id,
                from: EntryStatus::Assigned,
                to: EntryStatus::Available,
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            PoolError::Store(StoreError::Conflict {
                id,
                expected: 1,
                found: 2
            })
            .http_status_code(),
            409
        );
        assert_eq!(
            PoolError::Store(StoreError::InvalidTransition {
                id,
                from: EntryStatus::Error,
                to: EntryStatus::Available,
            })
            .http_status_code(),
            409
        );
        assert_eq!(
            PoolError::Provisioning(ProvisionError::Transport("reset".into())).http_status_code(),
            502
        );
        assert_eq!(
            PoolError::Store(StoreError::Database("io".into())).http_status_code(),
            500
        );
    }

    #[test]
    fn retriable_errors() {
        assert!(PoolError::EmptyPool { tier: tier() }.is_retriable());
        assert!(PoolError::Provisioning(ProvisionError::Rejected {
            status: 500,
            message: "boom".into()
        })
        .is_retriable());
        assert!(PoolError::Store(StoreError::Conflict {
            id: EntryId::generate(),
            expected: 0,
            found: 1
        })
        .is_retriable());
        assert!(!PoolError::UnknownTier(tier()).is_retriable());
        assert!(!PoolError::Store(StoreError::Database("io".into())).is_retriable());
    }

    #[test]
    fn empty_pool_message_names_tier() {
        let err = PoolError::EmptyPool { tier: tier() };
        assert_eq!(err.to_string(), "no available entries in tier registered");
    }
}
