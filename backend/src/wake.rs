use crate::error::WakeError;
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Platform hook that keeps the device awake while held.
pub trait WakeLock: Send + Sync {
    fn acquire(&self, tag: &str) -> Result<(), WakeError>;
    fn release(&self, tag: &str);
}

/// Holds a wake resource until dropped.
pub struct WakeGuard {
    lock: Arc<dyn WakeLock>,
    tag: &'static str,
}

impl WakeGuard {
    pub fn acquire(lock: Arc<dyn WakeLock>, tag: &'static str) -> Result<Self, WakeError> {
        lock.acquire(tag)?;
        Ok(Self { lock, tag })
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.lock.release(self.tag);
    }
}

/// Log-only wake lock that tracks how many guards are outstanding,
/// optionally refusing once `limit` are held.
#[derive(Default)]
pub struct CountingWakeLock {
    held: AtomicUsize,
    limit: Option<usize>,
}

impl CountingWakeLock {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            held: AtomicUsize::new(0),
            limit: Some(limit),
        }
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self, tag: &str) -> Result<(), WakeError> {
        let previous = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| match self.limit {
                Some(limit) if held >= limit => None,
                _ => Some(held + 1),
            })
            .map_err(|held| WakeError::Unavailable(format!("{}: {} already held", tag, held)))?;
        info!("wake resource acquired: {} ({} held)", tag, previous + 1);
        Ok(())
    }

    fn release(&self, tag: &str) {
        let held = self.held.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!("wake resource released: {} ({} held)", tag, held);
    }
}
