//! Buffer pool configuration.

use std::time::Duration;

use billing_buffer_core::Tier;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{PoolError, Result};
use crate::provisioner::TierParams;

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Target number of buffered entries per tier.
    #[serde(default = "BufferConfig::default_capacity")]
    pub buffer_capacity: u32,

    /// How many times each tier is topped up per `refill` run.
    ///
    /// Each attempt creates at most one entry per tier.
    #[serde(default = "BufferConfig::default_refill_attempts")]
    pub refill_attempts_per_run: u32,

    /// Maximum number of `Creating` entries polled per `sync` run.
    #[serde(default = "BufferConfig::default_sync_batch")]
    pub sync_batch_size: usize,

    /// Prefix for generated resource names.
    #[serde(default = "BufferConfig::default_name_prefix")]
    pub name_prefix: String,

    /// The tiers the pool keeps stocked.
    #[serde(default = "BufferConfig::default_tiers")]
    pub tiers: Vec<TierConfig>,

    /// Seconds an entry may sit in `Creating` before it is swept to `Error`.
    #[serde(default = "BufferConfig::default_creating_timeout")]
    pub creating_timeout_seconds: u64,

    /// Seconds an entry may sit in `Assigning` before it is swept to `Error`.
    #[serde(default = "BufferConfig::default_assigning_timeout")]
    pub assigning_timeout_seconds: u64,

    /// How long one attempt to take the assignment lock may wait, in milliseconds.
    #[serde(default = "BufferConfig::default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

impl BufferConfig {
    const fn default_capacity() -> u32 {
        10
    }

    const fn default_refill_attempts() -> u32 {
        5
    }

    const fn default_sync_batch() -> usize {
        5
    }

    fn default_name_prefix() -> String {
        "billing-buffer".to_string()
    }

    fn default_tiers() -> Vec<TierConfig> {
        vec![TierConfig {
            name: Tier::registered(),
            service_perimeter: None,
        }]
    }

    const fn default_creating_timeout() -> u64 {
        60 * 60 // 1 hour
    }

    const fn default_assigning_timeout() -> u64 {
        10 * 60 // 10 minutes
    }

    const fn default_lock_timeout() -> u64 {
        1000
    }

    /// Get the `Creating` grace period as a `Duration`.
    #[must_use]
    pub const fn creating_timeout(&self) -> Duration {
        Duration::from_secs(self.creating_timeout_seconds)
    }

    /// Get the `Assigning` grace period as a `Duration`.
    #[must_use]
    pub const fn assigning_timeout(&self) -> Duration {
        Duration::from_secs(self.assigning_timeout_seconds)
    }

    /// Get the lock acquire timeout as a `Duration`.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Look up a configured tier.
    #[must_use]
    pub fn tier(&self, tier: &Tier) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| &t.name == tier)
    }

    /// Check that the configuration can be used to run a pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if no tiers are configured, a tier
    /// appears twice, or a timeout is too large to compute a cutoff from.
    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(PoolError::InvalidConfig("no tiers configured".to_string()));
        }
        for (i, tier) in self.tiers.iter().enumerate() {
            if self.tiers[..i].iter().any(|t| t.name == tier.name) {
                return Err(PoolError::InvalidConfig(format!(
                    "tier {} configured twice",
                    tier.name
                )));
            }
        }
        let now = Utc::now();
        for (label, timeout) in [
            ("creating", self.creating_timeout()),
            ("assigning", self.assigning_timeout()),
        ] {
            cutoff(now, timeout).map_err(|_| {
                PoolError::InvalidConfig(format!("{label} timeout out of range"))
            })?;
        }
        Ok(())
    }

    /// Load configuration from environment variables over the defaults.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_env("BUFFER_CAPACITY") {
            config.buffer_capacity = n;
        }
        if let Some(n) = parse_env("BUFFER_REFILL_PROJECTS_PER_TASK") {
            config.refill_attempts_per_run = n;
        }
        if let Some(n) = parse_env("BUFFER_STATUS_CHECKS_PER_TASK") {
            config.sync_batch_size = n;
        }
        if let Ok(val) = std::env::var("BUFFER_PROJECT_NAME_PREFIX") {
            config.name_prefix = val;
        }
        if let Ok(val) = std::env::var("BUFFER_TIERS") {
            let tiers = parse_tiers(&val);
            if !tiers.is_empty() {
                config.tiers = tiers;
            }
        }
        if let Some(n) = parse_env("BUFFER_CREATING_TIMEOUT_SECS") {
            config.creating_timeout_seconds = n;
        }
        if let Some(n) = parse_env("BUFFER_ASSIGNING_TIMEOUT_SECS") {
            config.assigning_timeout_seconds = n;
        }
        if let Some(n) = parse_env("BUFFER_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = n;
        }

        config
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: Self::default_capacity(),
            refill_attempts_per_run: Self::default_refill_attempts(),
            sync_batch_size: Self::default_sync_batch(),
            name_prefix: Self::default_name_prefix(),
            tiers: Self::default_tiers(),
            creating_timeout_seconds: Self::default_creating_timeout(),
            assigning_timeout_seconds: Self::default_assigning_timeout(),
            lock_timeout_ms: Self::default_lock_timeout(),
        }
    }
}

/// One tier of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TierConfig {
    /// Tier name.
    pub name: Tier,
    /// Service perimeter new resources in this tier are placed in.
    #[serde(default)]
    pub service_perimeter: Option<String>,
}

impl TierConfig {
    /// Parameters sent with create requests for this tier.
    #[must_use]
    pub fn params(&self) -> TierParams {
        TierParams {
            tier: self.name.clone(),
            service_perimeter: self.service_perimeter.clone(),
        }
    }
}

/// The instant `grace` before `now`.
///
/// # Errors
///
/// Returns `PoolError::InvalidConfig` if the result cannot be represented.
pub fn cutoff(now: DateTime<Utc>, grace: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(grace)
        .ok()
        .and_then(|grace| now.checked_sub_signed(grace))
        .ok_or_else(|| {
            PoolError::InvalidConfig(format!(
                "grace period of {}s is out of range",
                grace.as_secs()
            ))
        })
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let val = std::env::var(key).ok()?;
    match val.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %val, "Ignoring unparseable environment variable");
            None
        }
    }
}

/// Parse `name[=perimeter],...` into tier configs, skipping invalid names.
fn parse_tiers(list: &str) -> Vec<TierConfig> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|item| {
            let (name, perimeter) = match item.split_once('=') {
                Some((name, perimeter)) => (name.trim(), Some(perimeter.trim())),
                None => (item, None),
            };
            match name.parse() {
                Ok(name) => Some(TierConfig {
                    name,
                    service_perimeter: perimeter
                        .filter(|p| !p.is_empty())
                        .map(ToString::to_string),
                }),
                Err(e) => {
                    tracing::warn!(tier = name, error = %e, "Ignoring invalid tier");
                    None
                }
            }
        })
        .collect()
}
