//! The named lock that serializes the "select and claim" step of assignment.
//!
//! Holders keep the lock only long enough to pick the oldest available entry
//! and move it to `Assigning`. Slow external calls happen after release.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

/// A short-lived, process-wide mutual exclusion lock.
#[async_trait]
pub trait AssignmentLock: Send + Sync {
    /// Try to take the lock, waiting at most the lock's timeout.
    ///
    /// Returns `false` if the timeout elapsed first.
    async fn try_acquire(&self) -> bool;

    /// Release the lock. Releasing a lock that is not held does nothing.
    ///
    /// Called from [`LockGuard`]'s `Drop`, so it must not block for long.
    fn release(&self);
}

/// Holds an [`AssignmentLock`] and releases it when dropped.
///
/// Unwinding out of the critical section drops the guard too, so a
/// panicking holder cannot keep the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a dyn AssignmentLock,
}

impl<'a> LockGuard<'a> {
    /// Take `lock`, retrying every timed-out attempt until it succeeds.
    pub async fn acquire(lock: &'a dyn AssignmentLock) -> LockGuard<'a> {
        while !lock.try_acquire().await {
            tracing::debug!("Assignment lock busy, retrying");
        }
        Self { lock }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// An [`AssignmentLock`] for pools that share a single process.
///
/// The guard of a tokio mutex is parked between `try_acquire` and `release`.
#[derive(Debug, Clone)]
pub struct InProcessLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    held: Arc<Mutex<Option<OwnedMutexGuard<()>>>>,
    timeout: Duration,
}

impl InProcessLock {
    /// Create a lock whose acquire attempts give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Arc::new(tokio::sync::Mutex::new(())),
            held: Arc::new(Mutex::new(None)),
            timeout,
        }
    }

    /// The acquire timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl AssignmentLock for InProcessLock {
    async fn try_acquire(&self) -> bool {
        let mutex = Arc::clone(&self.mutex);
        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                *self.held.lock() = Some(guard);
                true
            }
            Err(_) => false,
        }
    }

    fn release(&self) {
        let guard = self.held.lock().take();
        drop(guard);
    }
}
