//! Domain types stored in the database.
//!
//! These types represent the persisted state of pool entries.

use billing_buffer_core::{EntryId, ResourceName, Tier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pool entry record stored in the database.
///
/// One record exists per external resource tracked by the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Unique identifier for the entry.
    pub id: EntryId,
    /// The external system's name for the resource.
    pub resource_name: ResourceName,
    /// Tier this entry belongs to.
    pub tier: Tier,
    /// Current lifecycle state.
    pub status: EntryStatus,
    /// When the row was created.
    pub creation_time: DateTime<Utc>,
    /// When `status` last changed.
    pub last_status_changed_time: DateTime<Utc>,
    /// When the external creation status was last polled, if ever.
    #[serde(default)]
    pub last_sync_request_time: Option<DateTime<Utc>>,
    /// Principal the resource was handed to. Set only once `Assigned`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_principal: Option<String>,
    /// Optimistic concurrency counter, bumped by every successful save.
    #[serde(default)]
    pub version: u64,
}

impl PoolEntry {
    /// Create a new entry in the `Creating` state.
    #[must_use]
    pub fn creating(resource_name: ResourceName, tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::generate(),
            resource_name,
            tier,
            status: EntryStatus::Creating,
            creation_time: now,
            last_status_changed_time: now,
            last_sync_request_time: None,
            assigned_principal: None,
            version: 0,
        }
    }

    /// Set the status together with its change timestamp.
    ///
    /// The transition is checked when the entry is saved.
    pub fn set_status(&mut self, status: EntryStatus, now: DateTime<Utc>) {
        self.status = status;
        self.last_status_changed_time = now;
    }
}

/// Lifecycle states for a pool entry.
///
/// The discriminants are the storage codes used in index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum EntryStatus {
    /// External creation has been requested and is in progress.
    Creating = 0,
    /// Creation failed or the entry timed out. Terminal.
    Error = 1,
    /// Ready to be handed out.
    Available = 2,
    /// Claimed by a caller; access is being granted.
    Assigning = 3,
    /// Handed out to a principal. Terminal.
    Assigned = 4,
}

impl EntryStatus {
    /// All statuses, in storage-code order.
    pub const ALL: [Self; 5] = [
        Self::Creating,
        Self::Error,
        Self::Available,
        Self::Assigning,
        Self::Assigned,
    ];

    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to an `EntryStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Creating),
            1 => Some(Self::Error),
            2 => Some(Self::Available),
            3 => Some(Self::Assigning),
            4 => Some(Self::Assigned),
            _ => None,
        }
    }

    /// Returns true if an entry may move from `self` to `next`.
    ///
    /// Status only moves forward; `Error` and `Assigned` never change.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Creating, Self::Available | Self::Error)
                | (Self::Available, Self::Assigning)
                | (Self::Assigning, Self::Assigned | Self::Error)
        )
    }

    /// The upper-case name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Error => "ERROR",
            Self::Available => "AVAILABLE",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
