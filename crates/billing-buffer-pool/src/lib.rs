//! Warm pool of pre-provisioned billing projects.
//!
//! Creating a billing project in the cloud provider takes minutes, so this
//! crate keeps a buffer of ready ones per tier and hands them out instantly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              HTTP API / PoolWorker (cron)                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BufferPool                           │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────────┐    │
//! │  │  refill  │ │   sync   │ │  clean   │ │    assign    │    │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌─────────────┐  ┌──────────────┐
//!        │  Store   │   │ Provisioner │  │AssignmentLock│
//!        │ (RocksDB)│   │   (HTTP)    │  │ (in-process) │
//!        └──────────┘   └─────────────┘  └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use billing_buffer_pool::{BufferConfig, BufferManager, BufferPool, HttpProvisioner};
//! use billing_buffer_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/billing-buffer")?);
//! let provisioner = Arc::new(HttpProvisioner::new("http://provisioner:8080")?);
//! let pool = BufferPool::new(store, provisioner, BufferConfig::default())?;
//!
//! pool.refill().await?;
//! pool.sync().await?;
//!
//! let tier: billing_buffer_pool::Tier = "registered".parse()?;
//! let entry = pool.assign("alice@example.com", &tier).await?;
//! println!("Assigned {}", entry.resource_name);
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle
//!
//! - `Creating` → `Available` (provisioning done) or `Error`
//! - `Available` → `Assigning` (claimed under the lock)
//! - `Assigning` → `Assigned` (access granted) or `Error` (timed out)
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod capacity;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod metrics;
pub mod pool;
pub mod provisioner;
pub mod worker;

pub use capacity::{CapacityPolicy, UniformCapacity};
pub use clock::{Clock, SystemClock};
pub use config::{BufferConfig, TierConfig};
pub use error::{PoolError, ProvisionError, Result};
pub use lock::{AssignmentLock, InProcessLock, LockGuard};
pub use self::metrics::{Gauge, GaugeMetric, InMemorySink, MetricsSink, RecorderSink, TracingSink};
pub use pool::{BufferManager, BufferPool, BufferStatus, CleanReport, RefillReport, SyncReport};
pub use provisioner::{CreationStatus, HttpProvisioner, NoopProvisioner, Provisioner, TierParams};
pub use worker::{PoolWorker, WorkerConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "test-utils"))]
pub use provisioner::mock::MockProvisioner;

// Re-export commonly used types from dependencies for convenience
pub use billing_buffer_core::{EntryId, ResourceName, Tier};
pub use billing_buffer_store::{EntryStatus, PoolEntry};
