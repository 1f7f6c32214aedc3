//! End-to-end pool scenarios against a real RocksDB store.

use std::collections::HashSet;
use std::sync::Arc;

use billing_buffer_pool::{
    lifecycle, BufferConfig, BufferManager, BufferPool, CreationStatus, EntryStatus, ManualClock,
    MockProvisioner, PoolError, Tier, TierConfig,
};
use billing_buffer_store::{RocksStore, Store};
use chrono::{Duration, Utc};
use tempfile::TempDir;

struct TestPool {
    pool: Arc<BufferPool<RocksStore>>,
    provisioner: Arc<MockProvisioner>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

fn registered() -> Tier {
    Tier::registered()
}

fn controlled() -> Tier {
    "controlled".parse().unwrap()
}

fn config(capacity: u32, attempts: u32) -> BufferConfig {
    BufferConfig {
        buffer_capacity: capacity,
        refill_attempts_per_run: attempts,
        name_prefix: "test-prefix".to_string(),
        ..BufferConfig::default()
    }
}

fn setup(config: BufferConfig) -> TestPool {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let provisioner = Arc::new(MockProvisioner::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let pool = BufferPool::new(store, provisioner.clone(), config)
        .unwrap()
        .with_clock(clock.clone());

    TestPool {
        pool: Arc::new(pool),
        provisioner,
        clock,
        _dir: dir,
    }
}

impl TestPool {
    /// Refill, then mark everything ready and sync it in.
    async fn stock(&self) {
        self.pool.refill().await.unwrap();
        self.provisioner.set_default_status(CreationStatus::Ready);
        while self.pool.sync().await.unwrap().checked > 0 {}
    }

    async fn count(&self, status: EntryStatus) -> u64 {
        self.pool.count_by_status().await.unwrap()[&status]
    }
}

#[tokio::test]
async fn single_slot_buffer_round_trip() {
    let t = setup(config(1, 1));

    t.pool.refill().await.unwrap();
    assert_eq!(t.count(EntryStatus::Creating).await, 1);

    // Full: a second refill creates nothing
    assert_eq!(t.pool.refill().await.unwrap().created, 0);

    t.provisioner.set_default_status(CreationStatus::Ready);
    t.pool.sync().await.unwrap();
    assert_eq!(t.pool.status().await.unwrap().buffer_size, 1);

    let entry = t.pool.assign("alice@example.com", &registered()).await.unwrap();
    assert_eq!(entry.status, EntryStatus::Assigned);
    assert_eq!(entry.assigned_principal.as_deref(), Some("alice@example.com"));

    let err = t.pool.assign("bob@example.com", &registered()).await.unwrap_err();
    assert!(matches!(err, PoolError::EmptyPool { .. }));
    assert_eq!(err.http_status_code(), 503);

    // The slot frees up once the entry is handed out
    assert_eq!(t.pool.refill().await.unwrap().created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_never_share_an_entry() {
    const AVAILABLE: usize = 3;
    const CALLERS: usize = 10;

    let t = setup(config(3, 3));
    t.stock().await;
    assert_eq!(t.count(EntryStatus::Available).await, AVAILABLE as u64);

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let pool = Arc::clone(&t.pool);
            tokio::spawn(async move { pool.assign(&format!("user-{i}"), &registered()).await })
        })
        .collect();

    let mut assigned = HashSet::new();
    let mut empty = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(entry) => assert!(assigned.insert(entry.id), "entry handed out twice"),
            Err(PoolError::EmptyPool { .. }) => empty += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(assigned.len(), AVAILABLE);
    assert_eq!(empty, CALLERS - AVAILABLE);
    assert_eq!(t.count(EntryStatus::Assigned).await, AVAILABLE as u64);
    assert_eq!(t.provisioner.grants().len(), AVAILABLE);
}

#[tokio::test]
async fn stuck_assigning_is_retired_after_grace() {
    let t = setup(config(1, 1));
    t.stock().await;

    t.provisioner.fail_grant(true);
    let err = t.pool.assign("alice", &registered()).await.unwrap_err();
    assert!(err.is_retriable());

    let name = t.provisioner.started()[0].0.clone();
    let mut walk = vec![EntryStatus::Available];
    walk.push(t.pool.find_entry(&name).await.unwrap().unwrap().status);

    // Stuck entries still hold their slot
    assert_eq!(t.pool.refill().await.unwrap().created, 0);

    t.clock.advance(Duration::minutes(10) + Duration::seconds(1));
    let report = t.pool.clean().await.unwrap();
    assert_eq!(report.expired_assigning, 1);

    let entry = t.pool.find_entry(&name).await.unwrap().unwrap();
    walk.push(entry.status);
    assert_eq!(entry.status, EntryStatus::Error);
    assert!(entry.assigned_principal.is_none());
    assert!(lifecycle::is_forward_walk(&walk));

    // Errored entries free the slot
    assert_eq!(t.pool.refill().await.unwrap().created, 1);
}

#[tokio::test]
async fn creating_sweep_needs_both_timestamps_stale() {
    let mut cfg = config(2, 2);
    cfg.sync_batch_size = 1;
    let t = setup(cfg);
    t.pool.refill().await.unwrap();

    // Poll only one entry, then let an hour pass
    t.pool.sync().await.unwrap();
    t.clock.advance(Duration::minutes(61));

    // The polled entry is stale on both counts; the unpolled one stays
    let report = t.pool.clean().await.unwrap();
    assert_eq!(report.expired_creating, 1);
    assert_eq!(t.count(EntryStatus::Creating).await, 1);
    assert_eq!(t.count(EntryStatus::Error).await, 1);

    // Poll the survivor now: its sync time is fresh, so it stays
    t.pool.sync().await.unwrap();
    t.clock.advance(Duration::minutes(30));
    assert_eq!(t.pool.clean().await.unwrap().expired_creating, 0);

    t.clock.advance(Duration::minutes(31));
    assert_eq!(t.pool.clean().await.unwrap().expired_creating, 1);
    assert_eq!(t.count(EntryStatus::Creating).await, 0);
}

#[tokio::test]
async fn capacity_is_never_exceeded() {
    let t = setup(config(4, 3));

    for _ in 0..5 {
        t.pool.refill().await.unwrap();
    }
    assert_eq!(t.count(EntryStatus::Creating).await, 4);
    assert_eq!(t.provisioner.started().len(), 4);

    t.provisioner.set_default_status(CreationStatus::Ready);
    t.pool.sync().await.unwrap();
    t.pool.assign("alice", &registered()).await.unwrap();

    t.pool.refill().await.unwrap();
    let buffered: u64 = [
        EntryStatus::Creating,
        EntryStatus::Available,
        EntryStatus::Assigning,
    ]
    .iter()
    .map(|s| t.pool.store().count_by_status(*s).unwrap())
    .sum();
    assert_eq!(buffered, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_refills_respect_capacity() {
    const RUNS: usize = 16;

    let t = setup(config(1, 1));

    let handles: Vec<_> = (0..RUNS)
        .map(|_| {
            let pool = Arc::clone(&t.pool);
            tokio::spawn(async move { pool.refill().await })
        })
        .collect();

    let created: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap().unwrap().created)
        .sum();

    assert_eq!(created, 1);
    assert_eq!(t.count(EntryStatus::Creating).await, 1);
    assert_eq!(t.provisioner.started().len(), 1);
}

#[tokio::test]
async fn continuously_polled_creating_row_keeps_its_slot() {
    let t = setup(config(1, 1));
    t.provisioner.fail_start(true);
    t.provisioner.report_unknown(true);
    t.pool.refill().await.unwrap();

    // Two hours of 30 s sync runs, each followed by a clean
    for _ in 0..240 {
        t.clock.advance(Duration::seconds(30));
        t.pool.sync().await.unwrap();
        assert_eq!(t.pool.clean().await.unwrap().expired_creating, 0);
    }
    assert_eq!(t.count(EntryStatus::Creating).await, 1);
    assert_eq!(t.pool.refill().await.unwrap().created, 0);

    // Once polling stops for a full grace period the row is retired
    t.clock.advance(Duration::minutes(61));
    assert_eq!(t.pool.clean().await.unwrap().expired_creating, 1);
    assert_eq!(t.pool.refill().await.unwrap().created, 1);
}

#[tokio::test]
async fn tiers_fill_independently_with_their_perimeter() {
    let mut cfg = config(2, 2);
    cfg.tiers = vec![
        TierConfig {
            name: registered(),
            service_perimeter: None,
        },
        TierConfig {
            name: controlled(),
            service_perimeter: Some("perimeters/controlled".to_string()),
        },
    ];
    let t = setup(cfg);
    t.stock().await;

    let by_tier = t.pool.status_by_tier().await.unwrap();
    assert_eq!(by_tier[&registered()].buffer_size, 2);
    assert_eq!(by_tier[&controlled()].buffer_size, 2);

    for (_, params) in t.provisioner.started() {
        if params.tier == controlled() {
            assert_eq!(
                params.service_perimeter.as_deref(),
                Some("perimeters/controlled")
            );
        } else {
            assert!(params.service_perimeter.is_none());
        }
    }

    let entry = t.pool.assign("alice", &controlled()).await.unwrap();
    assert_eq!(entry.tier, controlled());
    let by_tier = t.pool.status_by_tier().await.unwrap();
    assert_eq!(by_tier[&registered()].buffer_size, 2);
    assert_eq!(by_tier[&controlled()].buffer_size, 1);
}

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let t = setup(config(2, 2));
    t.pool.refill().await.unwrap();
    t.provisioner.set_default_status(CreationStatus::Ready);

    let first = t.pool.sync().await.unwrap();
    assert_eq!(first.ready, 2);
    let counts = t.pool.count_by_status().await.unwrap();

    let second = t.pool.sync().await.unwrap();
    assert_eq!(second.checked, 0);
    assert_eq!(t.pool.count_by_status().await.unwrap(), counts);

    // Pending entries only get a fresh sync timestamp
    t.pool.assign("alice", &registered()).await.unwrap();
    t.provisioner.set_default_status(CreationStatus::Pending);
    t.pool.refill().await.unwrap();
    t.pool.sync().await.unwrap();
    t.clock.advance(Duration::seconds(5));
    let report = t.pool.sync().await.unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(t.count(EntryStatus::Creating).await, 1);
}

#[tokio::test]
async fn sync_batch_is_bounded_and_oldest_polled_first() {
    let t = setup(config(7, 7));
    t.pool.refill().await.unwrap();
    assert_eq!(t.count(EntryStatus::Creating).await, 7);

    let first = t.pool.sync().await.unwrap();
    assert_eq!(first.checked, 5);
    let polled_first: HashSet<_> = t.provisioner.status_calls().into_iter().collect();

    t.clock.advance(Duration::seconds(30));
    let second = t.pool.sync().await.unwrap();
    assert_eq!(second.checked, 5);

    // The two never-polled entries go before anything polled last time
    let calls = t.provisioner.status_calls();
    let second_batch = &calls[5..];
    for name in &second_batch[..2] {
        assert!(!polled_first.contains(name));
    }
    for name in &second_batch[2..] {
        assert!(polled_first.contains(name));
    }
}

#[tokio::test]
async fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let provisioner = Arc::new(MockProvisioner::new());
    provisioner.set_default_status(CreationStatus::Ready);

    {
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let pool = BufferPool::new(store, provisioner.clone(), config(2, 2)).unwrap();
        pool.refill().await.unwrap();
        pool.sync().await.unwrap();
    }

    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let pool = BufferPool::new(store, provisioner.clone(), config(2, 2)).unwrap();
    assert_eq!(pool.status().await.unwrap().buffer_size, 2);
    assert_eq!(pool.refill().await.unwrap().created, 0);

    let entry = pool.assign("alice", &registered()).await.unwrap();
    assert_eq!(entry.status, EntryStatus::Assigned);
}
