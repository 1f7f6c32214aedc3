//! Background worker that drives the pool's maintenance jobs.
//!
//! `refill`, `sync` and `clean` each run on their own interval until the
//! shutdown signal fires. Job failures are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::pool::BufferManager;

/// Configuration for the pool worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to run `refill`.
    pub refill_interval: Duration,
    /// How often to run `sync`.
    pub sync_interval: Duration,
    /// How often to run `clean`.
    pub clean_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_secs(60),
            sync_interval: Duration::from_secs(30),
            clean_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl WorkerConfig {
    /// Load intervals from environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let secs = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
        };

        if let Some(d) = secs("BUFFER_REFILL_INTERVAL_SECS") {
            config.refill_interval = d;
        }
        if let Some(d) = secs("BUFFER_SYNC_INTERVAL_SECS") {
            config.sync_interval = d;
        }
        if let Some(d) = secs("BUFFER_CLEAN_INTERVAL_SECS") {
            config.clean_interval = d;
        }

        config
    }
}

/// Background worker that runs the pool's maintenance jobs.
pub struct PoolWorker {
    pool: Arc<dyn BufferManager>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl PoolWorker {
    /// Create a new pool worker.
    pub fn new(pool: Arc<dyn BufferManager>, config: WorkerConfig) -> Self {
        Self {
            pool,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop.
    ///
    /// Every job runs once immediately, then on its interval. The loop exits
    /// when the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            refill_interval_secs = self.config.refill_interval.as_secs(),
            sync_interval_secs = self.config.sync_interval.as_secs(),
            clean_interval_secs = self.config.clean_interval.as_secs(),
            "Pool worker started"
        );

        let mut refill = tokio::time::interval(self.config.refill_interval);
        let mut sync = tokio::time::interval(self.config.sync_interval);
        let mut clean = tokio::time::interval(self.config.clean_interval);
        for interval in [&mut refill, &mut sync, &mut clean] {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                biased;

                () = self.shutdown.notified() => {
                    info!("Pool worker received shutdown signal");
                    break;
                }

                _ = refill.tick() => match self.pool.refill().await {
                    Ok(report) => debug!(created = report.created, "Refill run complete"),
                    Err(e) => error!(error = %e, "Refill run failed"),
                },

                _ = sync.tick() => match self.pool.sync().await {
                    Ok(report) => debug!(
                        checked = report.checked,
                        ready = report.ready,
                        failed = report.failed,
                        "Sync run complete"
                    ),
                    Err(e) => error!(error = %e, "Sync run failed"),
                },

                _ = clean.tick() => match self.pool.clean().await {
                    Ok(report) => debug!(
                        expired_creating = report.expired_creating,
                        expired_assigning = report.expired_assigning,
                        "Clean run complete"
                    ),
                    Err(e) => error!(error = %e, "Clean run failed"),
                },
            }
        }

        info!("Pool worker stopped");
    }
}
