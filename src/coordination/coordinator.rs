use super::lock_store::LockStore;
use crate::server::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a claim stays valid in the store before any other process may
/// take it over. Must comfortably exceed the longest expected run of the
/// protected work; a crashed holder blocks the cluster for at most this long.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

/// Spacing between acquisition attempts while waiting for a conflicting
/// holder to release.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Process-local face of the shared named-lock store.
///
/// Each worker constructs one coordinator with a random holder identity;
/// acquisition and release always act on behalf of that identity, so a
/// coordinator can never release another process's claim.
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
    holder_id: String,
    lock_ttl: Duration,
    poll_interval: Duration,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_ttl(store, DEFAULT_LOCK_TTL)
    }

    pub fn with_ttl(store: Arc<dyn LockStore>, lock_ttl: Duration) -> Self {
        Self {
            store,
            holder_id: uuid::Uuid::new_v4().to_string(),
            lock_ttl,
            poll_interval: ACQUIRE_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Try to obtain the named lock, waiting up to `timeout` for a
    /// conflicting holder to release.
    ///
    /// Returns `false` both on timeout and on store failure: if we cannot
    /// prove exclusive ownership, the caller must skip the protected work
    /// rather than risk running it twice.
    pub async fn acquire(&self, name: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            match self.store.try_acquire(name, &self.holder_id, self.lock_ttl) {
                Ok(true) => {
                    debug!(
                        "Acquired lock '{}' as {} after {:?}",
                        name,
                        self.holder_id,
                        started.elapsed()
                    );
                    metrics::record_lock_acquisition("acquired", started.elapsed());
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Lock store error acquiring '{}', skipping: {:#}", name, e);
                    metrics::record_lock_acquisition("error", started.elapsed());
                    return false;
                }
            }

            if started.elapsed() + self.poll_interval >= timeout {
                info!(
                    "Lock '{}' still held elsewhere after {:?}, giving up",
                    name, timeout
                );
                metrics::record_lock_acquisition("contended", started.elapsed());
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Release the named lock if this coordinator holds it.
    ///
    /// Never fails from the caller's point of view: a claim that was
    /// already gone is a no-op, and a store error is only logged — the
    /// row's TTL will expire it without our help.
    pub async fn release(&self, name: &str) {
        match self.store.release(name, &self.holder_id) {
            Ok(true) => debug!("Released lock '{}'", name),
            Ok(false) => debug!("Lock '{}' was not held by us at release time", name),
            Err(e) => warn!(
                "Failed to release lock '{}' (will expire on its own): {:#}",
                name, e
            ),
        }
    }
}
