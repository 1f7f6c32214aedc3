//! Buffer pool implementation.
//!
//! This module provides the `BufferManager` trait and the `BufferPool`
//! implementation that keeps each tier stocked and hands entries out.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use billing_buffer_core::{ResourceName, Tier};
use billing_buffer_store::{EntryStatus, PoolEntry, Store};
use serde::Serialize;

use crate::capacity::{CapacityPolicy, UniformCapacity};
use crate::clock::{Clock, SystemClock};
use crate::config::{BufferConfig, TierConfig};
use crate::error::{PoolError, Result};
use crate::lifecycle;
use crate::lock::{AssignmentLock, InProcessLock, LockGuard};
use crate::metrics::{Gauge, GaugeMetric, MetricsSink, TracingSink};
use crate::provisioner::{CreationStatus, Provisioner};

/// Trait defining the buffer pool operations.
///
/// `refill`, `sync` and `clean` are the periodic maintenance jobs; `assign`
/// is the user-facing operation.
#[async_trait]
pub trait BufferManager: Send + Sync {
    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Top up every tier toward its capacity.
    ///
    /// # Errors
    ///
    /// Per-tier failures are logged, not returned; an error here means the
    /// run could not start at all.
    async fn refill(&self) -> Result<RefillReport>;

    /// Poll the oldest-polled `Creating` entries for completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be read from the store.
    async fn sync(&self) -> Result<SyncReport>;

    /// Move entries stuck in `Creating` or `Assigning` to `Error`.
    ///
    /// # Errors
    ///
    /// Returns an error if candidates cannot be read from the store.
    async fn clean(&self) -> Result<CleanReport>;

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Hand the oldest available entry of `tier` to `principal`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::EmptyPool` if the tier has nothing available and
    /// `PoolError::Provisioning` if access could not be granted. In the
    /// latter case the entry stays `Assigning` until `clean` retires it.
    async fn assign(&self, principal: &str, tier: &Tier) -> Result<PoolEntry>;

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Count entries in every status.
    async fn count_by_status(&self) -> Result<BTreeMap<EntryStatus, u64>>;

    /// One gauge per status, also reported to the metrics sink.
    async fn gauge_data(&self) -> Result<Vec<Gauge>>;

    /// Total number of `Available` entries.
    async fn status(&self) -> Result<BufferStatus>;

    /// Number of `Available` entries per configured tier, also reported to
    /// the metrics sink.
    async fn status_by_tier(&self) -> Result<BTreeMap<Tier, BufferStatus>>;

    /// Look up an entry by its external resource name.
    async fn find_entry(&self, name: &ResourceName) -> Result<Option<PoolEntry>>;
}

/// Result of one `refill` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefillReport {
    /// Entries inserted in `Creating`.
    pub created: usize,
    /// Entries whose creation request failed to start.
    pub start_failures: usize,
    /// Tiers that were already full on at least one attempt.
    pub tiers_at_capacity: Vec<Tier>,
}

/// Result of one `sync` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries polled.
    pub checked: usize,
    /// Entries that became `Available`.
    pub ready: usize,
    /// Entries that became `Error`.
    pub failed: usize,
    /// Entries still being created.
    pub pending: usize,
    /// Entries whose poll or save failed.
    pub errors: usize,
}

/// Result of one `clean` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    /// `Creating` entries moved to `Error`.
    pub expired_creating: usize,
    /// `Assigning` entries moved to `Error`.
    pub expired_assigning: usize,
    /// Entries skipped because another writer got there first.
    pub conflicts: usize,
}

/// How many entries are ready to hand out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    /// Number of `Available` entries.
    pub buffer_size: u64,
}

/// Outcome of polling one `Creating` entry.
enum SyncOutcome {
    Ready,
    Failed,
    Pending,
}

/// The buffer pool service.
pub struct BufferPool<S: Store> {
    store: Arc<S>,
    provisioner: Arc<dyn Provisioner>,
    lock: Arc<dyn AssignmentLock>,
    clock: Arc<dyn Clock>,
    capacity: Arc<dyn CapacityPolicy>,
    metrics: Arc<dyn MetricsSink>,
    /// Serializes the capacity check and insert of concurrent refills, per tier.
    refill_slots: BTreeMap<Tier, tokio::sync::Mutex<()>>,
    config: BufferConfig,
}

impl<S: Store> BufferPool<S> {
    /// Create a pool with an in-process lock, the system clock, uniform
    /// capacity and a tracing metrics sink.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is unusable.
    pub fn new(
        store: Arc<S>,
        provisioner: Arc<dyn Provisioner>,
        config: BufferConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            provisioner,
            lock: Arc::new(InProcessLock::new(config.lock_timeout())),
            clock: Arc::new(SystemClock),
            capacity: Arc::new(UniformCapacity::new(config.buffer_capacity)),
            metrics: Arc::new(TracingSink),
            refill_slots: config
                .tiers
                .iter()
                .map(|tier| (tier.name.clone(), tokio::sync::Mutex::new(())))
                .collect(),
            config,
        })
    }

    /// Use a different assignment lock.
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<dyn AssignmentLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different capacity policy.
    #[must_use]
    pub fn with_capacity_policy(mut self, capacity: Arc<dyn CapacityPolicy>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Use a different metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Perform a validated status transition in memory.
    fn transition(&self, entry: &mut PoolEntry, target: EntryStatus) -> Result<()> {
        lifecycle::validate_transition(&entry.id, entry.status, target)?;
        entry.set_status(target, self.clock.now());
        Ok(())
    }

    /// Entries of `tier` that still occupy a buffer slot.
    fn buffered_count(&self, tier: &Tier) -> Result<u64> {
        lifecycle::BUFFERED.iter().try_fold(0u64, |acc, status| {
            Ok(acc + self.store.count_by_status_and_tier(*status, tier)?)
        })
    }

    /// Create one entry for `tier` if it is below capacity.
    async fn refill_tier(&self, tier: &TierConfig, report: &mut RefillReport) -> Result<()> {
        let capacity = u64::from(self.capacity.capacity(tier));

        let entry = {
            let _slot = self
                .refill_slots
                .get(&tier.name)
                .ok_or_else(|| PoolError::UnknownTier(tier.name.clone()))?
                .lock()
                .await;
            let current = self.buffered_count(&tier.name)?;

            if current >= capacity {
                tracing::debug!(
                    tier = %tier.name,
                    current,
                    capacity,
                    "Tier is at capacity"
                );
                if !report.tiers_at_capacity.contains(&tier.name) {
                    report.tiers_at_capacity.push(tier.name.clone());
                }
                return Ok(());
            }

            let name = ResourceName::generate(&self.config.name_prefix)?;
            let entry = PoolEntry::creating(name, tier.name.clone(), self.clock.now());
            self.store.insert_entry(&entry)?;
            report.created += 1;

            tracing::info!(
                entry_id = %entry.id,
                resource = %entry.resource_name,
                tier = %tier.name,
                unfilled = capacity - current,
                "Created buffer entry"
            );
            entry
        };

        // The row stays `Creating`; `clean` only retires it once polling goes stale
        if let Err(e) = self
            .provisioner
            .start_create(&entry.resource_name, &tier.params())
            .await
        {
            report.start_failures += 1;
            tracing::warn!(
                entry_id = %entry.id,
                resource = %entry.resource_name,
                error = %e,
                "Failed to start resource creation"
            );
        }

        Ok(())
    }

    async fn sync_entry(&self, entry: &mut PoolEntry) -> Result<SyncOutcome> {
        entry.last_sync_request_time = Some(self.clock.now());

        let outcome = match self
            .provisioner
            .get_create_status(&entry.resource_name)
            .await
        {
            Ok(CreationStatus::Ready) => {
                self.transition(entry, EntryStatus::Available)?;
                SyncOutcome::Ready
            }
            Ok(CreationStatus::Failed) => {
                self.transition(entry, EntryStatus::Error)?;
                SyncOutcome::Failed
            }
            Ok(CreationStatus::Pending) => SyncOutcome::Pending,
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    resource = %entry.resource_name,
                    error = %e,
                    "Failed to poll creation status"
                );
                // Save anyway so the next batch moves on to other entries
                self.store.save_entry(entry)?;
                return Err(e.into());
            }
        };

        self.store.save_entry(entry)?;
        Ok(outcome)
    }

    /// Pick the oldest available entry of `tier` and move it to `Assigning`.
    ///
    /// Must be called with the assignment lock held.
    fn claim_oldest(&self, tier: &Tier) -> Result<PoolEntry> {
        let mut entry = self
            .store
            .find_oldest_available(tier)?
            .ok_or_else(|| PoolError::EmptyPool { tier: tier.clone() })?;

        self.transition(&mut entry, EntryStatus::Assigning)?;
        self.store.save_entry(&mut entry)?;
        Ok(entry)
    }

    fn emit(
        &self,
        metric: GaugeMetric,
        status: EntryStatus,
        tier: Option<Tier>,
        value: u64,
    ) -> Gauge {
        let gauge = Gauge {
            metric,
            status,
            tier,
            value,
        };
        self.metrics.record_gauge(&gauge);
        gauge
    }
}

#[async_trait]
impl<S: Store + 'static> BufferManager for BufferPool<S> {
    // =========================================================================
    // Maintenance
    // =========================================================================

    async fn refill(&self) -> Result<RefillReport> {
        let mut report = RefillReport::default();

        for _ in 0..self.config.refill_attempts_per_run {
            for tier in &self.config.tiers {
                if let Err(e) = self.refill_tier(tier, &mut report).await {
                    tracing::error!(tier = %tier.name, error = %e, "Failed to refill tier");
                }
            }
        }

        tracing::debug!(
            created = report.created,
            start_failures = report.start_failures,
            "Refill finished"
        );

        Ok(report)
    }

    async fn sync(&self) -> Result<SyncReport> {
        let batch = self
            .store
            .list_by_status_oldest_sync_first(EntryStatus::Creating, self.config.sync_batch_size)?;

        let mut report = SyncReport::default();
        for mut entry in batch {
            report.checked += 1;
            match self.sync_entry(&mut entry).await {
                Ok(SyncOutcome::Ready) => {
                    report.ready += 1;
                    tracing::info!(
                        entry_id = %entry.id,
                        resource = %entry.resource_name,
                        "Buffer entry is available"
                    );
                }
                Ok(SyncOutcome::Failed) => {
                    report.failed += 1;
                    tracing::warn!(
                        entry_id = %entry.id,
                        resource = %entry.resource_name,
                        "Resource creation failed"
                    );
                }
                Ok(SyncOutcome::Pending) => report.pending += 1,
                Err(PoolError::Store(e)) if e.is_conflict() => {
                    report.errors += 1;
                    tracing::warn!(entry_id = %entry.id, error = %e, "Entry changed during sync");
                }
                Err(PoolError::Provisioning(_)) => report.errors += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(entry_id = %entry.id, error = %e, "Failed to sync entry");
                }
            }
        }

        Ok(report)
    }

    async fn clean(&self) -> Result<CleanReport> {
        let now = self.clock.now();
        let mut report = CleanReport::default();

        for (status, grace) in [
            (EntryStatus::Creating, self.config.creating_timeout()),
            (EntryStatus::Assigning, self.config.assigning_timeout()),
        ] {
            let cutoff = crate::config::cutoff(now, grace)?;

            for mut entry in self.store.list_by_status_changed_before(status, cutoff)? {
                // Creating entries must also have gone unpolled for the grace period
                if status == EntryStatus::Creating
                    && !entry.last_sync_request_time.is_some_and(|t| t < cutoff)
                {
                    continue;
                }

                tracing::warn!(
                    entry_id = %entry.id,
                    resource = %entry.resource_name,
                    from = %status,
                    since = %entry.last_status_changed_time,
                    "Entry timed out, moving to ERROR"
                );

                let saved = self
                    .transition(&mut entry, EntryStatus::Error)
                    .and_then(|()| self.store.save_entry(&mut entry).map_err(PoolError::from));

                match saved {
                    Ok(()) if status == EntryStatus::Creating => report.expired_creating += 1,
                    Ok(()) => report.expired_assigning += 1,
                    Err(PoolError::Store(e)) if e.is_conflict() => {
                        report.conflicts += 1;
                        tracing::warn!(entry_id = %entry.id, error = %e, "Entry changed during clean");
                    }
                    Err(e) => {
                        tracing::error!(entry_id = %entry.id, error = %e, "Failed to clean entry");
                    }
                }
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    async fn assign(&self, principal: &str, tier: &Tier) -> Result<PoolEntry> {
        if self.config.tier(tier).is_none() {
            return Err(PoolError::UnknownTier(tier.clone()));
        }

        let guard = LockGuard::acquire(self.lock.as_ref()).await;
        let claimed = self.claim_oldest(tier);
        drop(guard);
        let mut entry = claimed?;

        if let Err(e) = self
            .provisioner
            .grant_access(principal, &entry.resource_name)
            .await
        {
            tracing::warn!(
                entry_id = %entry.id,
                resource = %entry.resource_name,
                principal,
                error = %e,
                "Failed to grant access, leaving entry ASSIGNING"
            );
            return Err(e.into());
        }

        self.transition(&mut entry, EntryStatus::Assigned)?;
        entry.assigned_principal = Some(principal.to_string());
        self.store.save_entry(&mut entry)?;

        tracing::info!(
            entry_id = %entry.id,
            resource = %entry.resource_name,
            tier = %tier,
            principal,
            "Assigned buffer entry"
        );

        Ok(entry)
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    async fn count_by_status(&self) -> Result<BTreeMap<EntryStatus, u64>> {
        Ok(self.store.count_by_status_map()?)
    }

    async fn gauge_data(&self) -> Result<Vec<Gauge>> {
        Ok(self
            .store
            .count_by_status_map()?
            .into_iter()
            .map(|(status, count)| self.emit(GaugeMetric::EntryCount, status, None, count))
            .collect())
    }

    async fn status(&self) -> Result<BufferStatus> {
        Ok(BufferStatus {
            buffer_size: self.store.count_by_status(EntryStatus::Available)?,
        })
    }

    async fn status_by_tier(&self) -> Result<BTreeMap<Tier, BufferStatus>> {
        let mut by_tier = BTreeMap::new();
        for tier in &self.config.tiers {
            let buffer_size = self
                .store
                .count_by_status_and_tier(EntryStatus::Available, &tier.name)?;
            self.emit(
                GaugeMetric::TierBufferSize,
                EntryStatus::Available,
                Some(tier.name.clone()),
                buffer_size,
            );
            by_tier.insert(tier.name.clone(), BufferStatus { buffer_size });
        }
        Ok(by_tier)
    }

    async fn find_entry(&self, name: &ResourceName) -> Result<Option<PoolEntry>> {
        Ok(self.store.get_entry_by_resource_name(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics::InMemorySink;
    use crate::provisioner::mock::MockProvisioner;
    use billing_buffer_store::RocksStore;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Harness {
        pool: BufferPool<RocksStore>,
        provisioner: Arc<MockProvisioner>,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    fn harness(config: BufferConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provisioner = Arc::new(MockProvisioner::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let pool = BufferPool::new(store, provisioner.clone(), config)
            .unwrap()
            .with_clock(clock.clone());
        Harness {
            pool,
            provisioner,
            clock,
            _dir: dir,
        }
    }

    fn config(capacity: u32) -> BufferConfig {
        BufferConfig {
            buffer_capacity: capacity,
            refill_attempts_per_run: 1,
            name_prefix: "test-prefix".to_string(),
            ..BufferConfig::default()
        }
    }

    fn tier() -> Tier {
        Tier::registered()
    }

    #[tokio::test]
    async fn refill_creates_one_entry_per_attempt() {
        let h = harness(config(3));

        let report = h.pool.refill().await.unwrap();
        assert_eq!(report.created, 1);

        let started = h.provisioner.started();
        assert_eq!(started.len(), 1);
        let entry = h.pool.find_entry(&started[0].0).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Creating);
        assert_eq!(entry.tier, tier());
        assert!(entry.resource_name.as_str().starts_with("test-prefix-"));
        assert_eq!(entry.creation_time, entry.last_status_changed_time);
    }

    #[test]
    fn new_rejects_timeout_without_cutoff() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mut cfg = config(1);
        cfg.creating_timeout_seconds = 1_000_000_000_000_000;

        let result = BufferPool::new(store, Arc::new(MockProvisioner::new()), cfg);
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn refill_stops_at_capacity() {
        let mut cfg = config(2);
        cfg.refill_attempts_per_run = 5;
        let h = harness(cfg);

        let report = h.pool.refill().await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.tiers_at_capacity, vec![tier()]);
        assert_eq!(h.provisioner.started().len(), 2);
    }

    #[tokio::test]
    async fn failed_start_still_leaves_creating_row() {
        let h = harness(config(1));
        h.provisioner.fail_start(true);

        let report = h.pool.refill().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.start_failures, 1);

        let counts = h.pool.count_by_status().await.unwrap();
        assert_eq!(counts[&EntryStatus::Creating], 1);
    }

    #[tokio::test]
    async fn sync_moves_ready_and_failed() {
        let mut cfg = config(3);
        cfg.refill_attempts_per_run = 3;
        let h = harness(cfg);
        h.pool.refill().await.unwrap();

        let started = h.provisioner.started();
        h.provisioner.set_status(&started[0].0, CreationStatus::Ready);
        h.provisioner.set_status(&started[1].0, CreationStatus::Failed);

        let report = h.pool.sync().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.ready, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending, 1);

        let ready = h.pool.find_entry(&started[0].0).await.unwrap().unwrap();
        assert_eq!(ready.status, EntryStatus::Available);
        assert_eq!(ready.last_sync_request_time, Some(h.clock.now()));

        let pending = h.pool.find_entry(&started[2].0).await.unwrap().unwrap();
        assert_eq!(pending.status, EntryStatus::Creating);
        assert!(pending.last_sync_request_time.is_some());
    }

    #[tokio::test]
    async fn sync_poll_error_still_stamps_time() {
        let h = harness(config(1));
        h.pool.refill().await.unwrap();
        h.provisioner.report_unknown(true);

        let report = h.pool.sync().await.unwrap();
        assert_eq!(report.errors, 1);

        let name = &h.provisioner.started()[0].0;
        let entry = h.pool.find_entry(name).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Creating);
        assert_eq!(entry.last_sync_request_time, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn sync_keeps_going_past_a_failing_row() {
        let mut cfg = config(3);
        cfg.refill_attempts_per_run = 3;
        let h = harness(cfg);
        h.pool.refill().await.unwrap();

        let started = h.provisioner.started();
        let (ready, broken, failed) = (&started[0].0, &started[1].0, &started[2].0);
        h.provisioner.set_status(ready, CreationStatus::Ready);
        h.provisioner.set_unreachable(broken, true);
        h.provisioner.set_status(failed, CreationStatus::Failed);

        let report = h.pool.sync().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.ready, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(h.provisioner.status_calls().len(), 3);

        let ready = h.pool.find_entry(ready).await.unwrap().unwrap();
        assert_eq!(ready.status, EntryStatus::Available);
        let failed = h.pool.find_entry(failed).await.unwrap().unwrap();
        assert_eq!(failed.status, EntryStatus::Error);
        let broken = h.pool.find_entry(broken).await.unwrap().unwrap();
        assert_eq!(broken.status, EntryStatus::Creating);
        assert_eq!(broken.last_sync_request_time, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn assign_hands_out_oldest() {
        let mut cfg = config(2);
        cfg.refill_attempts_per_run = 1;
        let h = harness(cfg);

        h.pool.refill().await.unwrap();
        h.clock.advance(Duration::minutes(1));
        h.pool.refill().await.unwrap();
        h.provisioner.set_default_status(CreationStatus::Ready);
        h.pool.sync().await.unwrap();

        let first = h.provisioner.started()[0].0.clone();
        let entry = h.pool.assign("alice@example.com", &tier()).await.unwrap();
        assert_eq!(entry.resource_name, first);
        assert_eq!(entry.status, EntryStatus::Assigned);
        assert_eq!(entry.assigned_principal.as_deref(), Some("alice@example.com"));
        assert_eq!(
            h.provisioner.grants(),
            vec![("alice@example.com".to_string(), first)]
        );
    }

    #[tokio::test]
    async fn assign_empty_pool() {
        let h = harness(config(1));
        let err = h.pool.assign("alice", &tier()).await.unwrap_err();
        assert!(matches!(err, PoolError::EmptyPool { tier: t } if t == tier()));
    }

    #[tokio::test]
    async fn assign_unknown_tier() {
        let h = harness(config(1));
        let err = h
            .pool
            .assign("alice", &"controlled".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::UnknownTier(_)));
    }

    #[tokio::test]
    async fn assign_grant_failure_leaves_assigning() {
        let h = harness(config(1));
        h.pool.refill().await.unwrap();
        h.provisioner.set_default_status(CreationStatus::Ready);
        h.pool.sync().await.unwrap();
        h.provisioner.fail_grant(true);

        let err = h.pool.assign("alice", &tier()).await.unwrap_err();
        assert!(matches!(err, PoolError::Provisioning(_)));

        let counts = h.pool.count_by_status().await.unwrap();
        assert_eq!(counts[&EntryStatus::Assigning], 1);
        assert_eq!(counts[&EntryStatus::Available], 0);
    }

    /// A clock that panics once when armed.
    struct FaultyClock {
        inner: ManualClock,
        armed: AtomicBool,
    }

    impl Clock for FaultyClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            assert!(!self.armed.swap(false, Ordering::SeqCst), "clock failure");
            self.inner.now()
        }
    }

    #[tokio::test]
    async fn assign_lock_survives_a_panicking_holder() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provisioner = Arc::new(MockProvisioner::new());
        let clock = Arc::new(FaultyClock {
            inner: ManualClock::new(Utc::now()),
            armed: AtomicBool::new(false),
        });
        let pool = Arc::new(
            BufferPool::new(store, provisioner.clone(), config(1))
                .unwrap()
                .with_clock(clock.clone()),
        );
        pool.refill().await.unwrap();
        provisioner.set_default_status(CreationStatus::Ready);
        pool.sync().await.unwrap();

        // The claim reads the clock while holding the lock
        clock.armed.store(true, Ordering::SeqCst);
        let crashed = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.assign("alice", &tier()).await })
        };
        assert!(crashed.await.unwrap_err().is_panic());

        let entry = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            pool.assign("bob", &tier()),
        )
        .await
        .expect("assignment lock was never released")
        .unwrap();
        assert_eq!(entry.assigned_principal.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn clean_sweeps_stuck_assigning() {
        let h = harness(config(1));
        h.pool.refill().await.unwrap();
        h.provisioner.set_default_status(CreationStatus::Ready);
        h.pool.sync().await.unwrap();
        h.provisioner.fail_grant(true);
        h.pool.assign("alice", &tier()).await.unwrap_err();

        h.clock.advance(Duration::minutes(9));
        assert_eq!(h.pool.clean().await.unwrap(), CleanReport::default());

        h.clock.advance(Duration::minutes(2));
        let report = h.pool.clean().await.unwrap();
        assert_eq!(report.expired_assigning, 1);

        let counts = h.pool.count_by_status().await.unwrap();
        assert_eq!(counts[&EntryStatus::Error], 1);
        assert_eq!(counts[&EntryStatus::Assigning], 0);
    }

    #[tokio::test]
    async fn clean_requires_both_creating_timestamps_stale() {
        let h = harness(config(1));
        h.pool.refill().await.unwrap();

        // Never polled: not eligible no matter how old
        h.clock.advance(Duration::minutes(61));
        assert_eq!(h.pool.clean().await.unwrap().expired_creating, 0);

        // Polled just now: still not eligible
        h.pool.sync().await.unwrap();
        assert_eq!(h.pool.clean().await.unwrap().expired_creating, 0);

        // Both stale
        h.clock.advance(Duration::minutes(61));
        assert_eq!(h.pool.clean().await.unwrap().expired_creating, 1);
    }

    #[tokio::test]
    async fn aggregates_report_to_sink() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let sink = Arc::new(InMemorySink::new());
        let provisioner = Arc::new(MockProvisioner::new());
        let pool = BufferPool::new(store, provisioner.clone(), config(2))
            .unwrap()
            .with_metrics(sink.clone());

        pool.refill().await.unwrap();
        pool.refill().await.unwrap();
        provisioner.set_default_status(CreationStatus::Ready);
        pool.sync().await.unwrap();

        let gauges = pool.gauge_data().await.unwrap();
        assert_eq!(gauges.len(), EntryStatus::ALL.len());
        assert_eq!(
            sink.get(GaugeMetric::EntryCount, EntryStatus::Available, None),
            Some(2)
        );
        assert_eq!(
            sink.get(GaugeMetric::EntryCount, EntryStatus::Assigned, None),
            Some(0)
        );

        assert_eq!(pool.status().await.unwrap().buffer_size, 2);
        let by_tier = pool.status_by_tier().await.unwrap();
        assert_eq!(by_tier[&tier()].buffer_size, 2);
        assert_eq!(
            sink.get(GaugeMetric::TierBufferSize, EntryStatus::Available, Some(&tier())),
            Some(2)
        );

        let pool = pool.with_capacity_policy(Arc::new(UniformCapacity::new(0)));
        assert_eq!(pool.refill().await.unwrap().created, 0);
    }
}
