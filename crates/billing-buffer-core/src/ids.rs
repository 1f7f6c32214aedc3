//! Core identifier types for the billing project buffer.
//!
//! This module provides strongly-typed identifiers for pool entries, the
//! external resources they track, and the tiers that partition the pool.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IdError;

/// Number of hex characters in a generated resource name suffix.
pub const RESOURCE_SUFFIX_LEN: usize = 8;

/// Maximum length of a resource name in bytes.
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

/// Maximum length of a tier name in bytes.
pub const MAX_TIER_LEN: usize = 64;

/// A 16-byte pool entry identifier based on UUID v4.
///
/// Entry IDs are randomly generated when a row is created and never change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(uuid::Uuid);

impl EntryId {
    /// Create a new `EntryId` from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Create a new `EntryId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Generate a new random `EntryId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Return the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Return the bytes of the UUID.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl FromStr for EntryId {
    type Err = IdError;

    /// Parse an `EntryId` from a UUID string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
        Ok(Self(uuid))
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntryId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.0.to_string()
    }
}

impl AsRef<[u8]> for EntryId {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// The external system's unique name for a provisioned resource.
///
/// Names consist of lowercase ASCII letters, digits and `-`. Generated names
/// are an environment prefix followed by a short hex suffix, e.g.
/// `aou-rw-perf-8aec175b`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// Generate a new resource name under the given prefix.
    ///
    /// The suffix is the first [`RESOURCE_SUFFIX_LEN`] hex characters of a
    /// blake3 hash over a fresh UUID. A `-` separator is appended to the
    /// prefix unless it already ends with one.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix contains characters that are not
    /// allowed in a resource name, or the result would be too long.
    pub fn generate(prefix: &str) -> Result<Self, IdError> {
        let seed = uuid::Uuid::new_v4();
        let digest = blake3::hash(seed.as_bytes());
        let suffix = &hex::encode(digest.as_bytes())[..RESOURCE_SUFFIX_LEN];

        let separator = if prefix.ends_with('-') { "" } else { "-" };
        format!("{prefix}{separator}{suffix}").parse()
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "resource name";

        if s.is_empty() {
            return Err(IdError::Empty { kind: KIND });
        }
        if s.len() > MAX_RESOURCE_NAME_LEN {
            return Err(IdError::TooLong {
                kind: KIND,
                max: MAX_RESOURCE_NAME_LEN,
                got: s.len(),
            });
        }
        if let Some(ch) = s
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(IdError::InvalidCharacter { kind: KIND, ch });
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({})", self.0)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

impl AsRef<[u8]> for ResourceName {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A pool partition key, such as `registered` or `controlled`.
///
/// Capacity and assignment are always scoped to a single tier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tier(String);

impl Tier {
    /// The tier used when none is configured.
    #[must_use]
    pub fn registered() -> Self {
        Self("registered".to_string())
    }

    /// Return the tier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tier {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const KIND: &str = "tier";

        if s.is_empty() {
            return Err(IdError::Empty { kind: KIND });
        }
        if s.len() > MAX_TIER_LEN {
            return Err(IdError::TooLong {
                kind: KIND,
                max: MAX_TIER_LEN,
                got: s.len(),
            });
        }
        if let Some(ch) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidCharacter { kind: KIND, ch });
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier({})", self.0)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Tier {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tier> for String {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl AsRef<[u8]> for Tier {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}
