//! Per-tier capacity policies.

use crate::config::TierConfig;

/// Decides how many buffered entries a tier should hold.
pub trait CapacityPolicy: Send + Sync {
    /// Target buffer size for `tier`.
    fn capacity(&self, tier: &TierConfig) -> u32;
}

/// Every tier gets the same, independent capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformCapacity {
    capacity: u32,
}

impl UniformCapacity {
    /// Give each tier `capacity` slots.
    #[must_use]
    pub const fn new(capacity: u32) -> Self {
        Self { capacity }
    }
}

impl CapacityPolicy for UniformCapacity {
    fn capacity(&self, _tier: &TierConfig) -> u32 {
        self.capacity
    }
}
