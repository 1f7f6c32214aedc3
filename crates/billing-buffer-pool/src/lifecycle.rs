//! Pool entry lifecycle state machine.
//!
//! This module defines the valid status transitions for pool entries and
//! provides validation logic so that status only ever moves forward.
//!
//! # State Machine
//!
//! ```text
//!     ┌──────────┐  ready   ┌───────────┐  claim   ┌───────────┐  granted  ┌──────────┐
//!     │ Creating │─────────▶│ Available │─────────▶│ Assigning │──────────▶│ Assigned │
//!     └────┬─────┘          └───────────┘          └─────┬─────┘           └──────────┘
//!          │ failed / timed out                          │ timed out
//!          ▼                                             ▼
//!     ┌──────────────────────────────────────────────────────┐
//!     │                        Error                         │
//!     └──────────────────────────────────────────────────────┘
//! ```

use billing_buffer_core::EntryId;
use billing_buffer_store::EntryStatus;

use crate::error::{PoolError, Result};

/// Statuses that still count toward a tier's buffer.
pub const BUFFERED: [EntryStatus; 3] = [
    EntryStatus::Creating,
    EntryStatus::Available,
    EntryStatus::Assigning,
];

/// Validates a status transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `PoolError::InvalidTransition` if the transition is not allowed.
pub fn validate_transition(
    id: &EntryId,
    from: EntryStatus,
    to: EntryStatus,
) -> Result<EntryStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(PoolError::InvalidTransition { id: *id, from, to })
    }
}

/// Check if a status transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: EntryStatus, to: EntryStatus) -> bool {
    from.can_transition_to(to)
}

/// Returns the list of valid target statuses from the given status.
#[must_use]
pub fn valid_transitions_from(status: EntryStatus) -> Vec<EntryStatus> {
    use EntryStatus::{Assigned, Assigning, Available, Creating, Error};

    match status {
        Creating => vec![Available, Error],
        Available => vec![Assigning],
        Assigning => vec![Assigned, Error],
        Assigned | Error => Vec::new(),
    }
}

/// Returns true if no further transitions are possible.
#[must_use]
pub const fn is_terminal(status: EntryStatus) -> bool {
    matches!(status, EntryStatus::Assigned | EntryStatus::Error)
}

/// Returns true if the entry still occupies a slot in its tier's buffer.
#[must_use]
pub const fn is_buffered(status: EntryStatus) -> bool {
    matches!(
        status,
        EntryStatus::Creating | EntryStatus::Available | EntryStatus::Assigning
    )
}

/// Position of a status along the forward order of the state machine.
///
/// Every valid transition strictly increases the rank.
#[must_use]
pub const fn rank(status: EntryStatus) -> u8 {
    match status {
        EntryStatus::Creating => 0,
        EntryStatus::Available => 1,
        EntryStatus::Assigning => 2,
        EntryStatus::Assigned => 3,
        EntryStatus::Error => 4,
    }
}

/// Returns true if an observed sequence of statuses never moves backwards.
#[must_use]
pub fn is_forward_walk(observed: &[EntryStatus]) -> bool {
    observed.windows(2).all(|w| rank(w[0]) <= rank(w[1]))
}
