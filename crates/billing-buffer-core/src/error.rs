//! Identifier parsing errors.

use thiserror::Error;

/// A result type using `IdError`.
pub type Result<T> = std::result::Result<T, IdError>;

/// Errors that can occur when parsing or generating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is empty.
    #[error("{kind} must not be empty")]
    Empty {
        /// The kind of identifier being parsed.
        kind: &'static str,
    },

    /// The input contains a character outside the allowed set.
    #[error("{kind} contains invalid character {ch:?}")]
    InvalidCharacter {
        /// The kind of identifier being parsed.
        kind: &'static str,
        /// The offending character.
        ch: char,
    },

    /// The input exceeds the maximum length.
    #[error("{kind} is too long: max {max} bytes, got {got}")]
    TooLong {
        /// The kind of identifier being parsed.
        kind: &'static str,
        /// The maximum allowed length.
        max: usize,
        /// The actual length.
        got: usize,
    },
}
