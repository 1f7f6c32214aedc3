//! Core types for the billing project buffer.
//!
//! This crate provides the foundational types shared by the store and the pool:
//!
//! - **Identifiers**: Strongly-typed IDs for pool entries, external resource
//!   names, and tiers
//! - **Error types**: Identifier parsing errors
//!
//! # Example
//!
//! ```
//! use billing_buffer_core::{EntryId, ResourceName, Tier};
//!
//! // Generate a fresh entry ID
//! let entry_id = EntryId::generate();
//!
//! // Generate a resource name under an environment prefix
//! let name = ResourceName::generate("aou-rw-test").unwrap();
//! assert!(name.as_str().starts_with("aou-rw-test-"));
//!
//! // Parse a tier
//! let tier: Tier = "registered".parse().unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{IdError, Result};
pub use ids::{EntryId, ResourceName, Tier};
