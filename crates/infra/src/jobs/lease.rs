//! Leases: ephemeral "a worker owns this job" markers.
//!
//! Two keys per owned job:
//! - `lease:{id}` carries a TTL and is refreshed by a heartbeat while the
//!   worker is alive. Presence means ownership.
//! - `inflight:{id}` has no TTL. It tells the watchdog which leases are
//!   expected to exist, so a lapsed lease is noticed even after its key is gone.
//!
//! Both are written in the same batch as the `running` transition and deleted
//! in the same batch as the transition that ends ownership.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use queuey_core::JobId;

use crate::store::{keys, QueueStore, StoreResult, WriteBatch};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct LeaseManager<S> {
    store: S,
    ttl: Duration,
}

impl<S: QueueStore + Clone + 'static> LeaseManager<S> {
    pub fn new(store: S, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Add lease acquisition to `batch`.
    pub fn acquire(&self, batch: WriteBatch, id: JobId) -> WriteBatch {
        batch
            .set_ex(keys::lease(id), "1", self.ttl)
            .set(keys::in_flight(id), "1")
    }

    /// Add lease release to `batch`.
    pub fn release(&self, batch: WriteBatch, id: JobId) -> WriteBatch {
        batch.delete(keys::lease(id)).delete(keys::in_flight(id))
    }

    /// Re-arm the lease TTL.
    pub fn refresh(&self, id: JobId) -> StoreResult<()> {
        self.store
            .apply(WriteBatch::new().set_ex(keys::lease(id), "1", self.ttl))
    }

    pub fn is_held(&self, id: JobId) -> StoreResult<bool> {
        self.store.exists(&keys::lease(id))
    }

    /// Ids with an in-flight marker, i.e. jobs some worker claimed and has not
    /// released yet. Keys that do not parse as job ids are skipped.
    pub fn in_flight(&self) -> StoreResult<Vec<JobId>> {
        let found = self
            .store
            .scan_keys(&keys::pattern(keys::IN_FLIGHT_PREFIX))?;
        Ok(found
            .iter()
            .filter_map(|key| {
                let id = keys::job_id_from(key, keys::IN_FLIGHT_PREFIX);
                if id.is_none() {
                    warn!(key = %key, "skipping unparsable in-flight marker");
                }
                id
            })
            .collect())
    }

    /// Keep the lease alive from a background thread until the guard is stopped
    /// or dropped. Refreshes every TTL/3.
    pub fn start_heartbeat(&self, id: JobId) -> LeaseGuard {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = (self.ttl / 3).max(Duration::from_millis(10));
        let leases = self.clone();

        let spawned = thread::Builder::new()
            .name(format!("lease-{id}"))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            if let Err(e) = leases.refresh(id) {
                                warn!(job_id = %id, error = %e, "lease refresh failed");
                            }
                        }
                        // Stop requested, or the guard went away.
                        _ => break,
                    }
                }
                debug!(job_id = %id, "lease heartbeat stopped");
            });

        let join = match spawned {
            Ok(join) => Some(join),
            Err(e) => {
                warn!(job_id = %id, error = %e, "could not start lease heartbeat; lease will lapse after its TTL");
                None
            }
        };

        LeaseGuard {
            stop: Some(stop_tx),
            join,
        }
    }
}

/// Running heartbeat for one lease. Stopping it does not delete the lease.
#[derive(Debug)]
pub struct LeaseGuard {
    stop: Option<mpsc::Sender<()>>,
    join: Option<thread::JoinHandle<()>>,
}

impl LeaseGuard {
    /// Stop refreshing and wait for the heartbeat thread to exit.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::InMemoryQueueStore;

    fn manager(ttl: Duration) -> (Arc<InMemoryQueueStore>, LeaseManager<Arc<InMemoryQueueStore>>) {
        let store = Arc::new(InMemoryQueueStore::new());
        (store.clone(), LeaseManager::new(store, ttl))
    }

    #[test]
    fn acquire_and_release_manage_both_markers() {
        let (store, leases) = manager(DEFAULT_LEASE_TTL);
        let id = JobId::new();

        store.apply(leases.acquire(WriteBatch::new(), id)).unwrap();
        assert!(leases.is_held(id).unwrap());
        assert_eq!(leases.in_flight().unwrap(), vec![id]);

        store.apply(leases.release(WriteBatch::new(), id)).unwrap();
        assert!(!leases.is_held(id).unwrap());
        assert!(leases.in_flight().unwrap().is_empty());
    }

    #[test]
    fn lease_lapses_without_heartbeat_but_marker_stays() {
        let (store, leases) = manager(Duration::from_millis(30));
        let id = JobId::new();

        store.apply(leases.acquire(WriteBatch::new(), id)).unwrap();
        thread::sleep(Duration::from_millis(60));

        assert!(!leases.is_held(id).unwrap());
        assert_eq!(leases.in_flight().unwrap(), vec![id]);
    }

    #[test]
    fn heartbeat_keeps_lease_alive() {
        let (store, leases) = manager(Duration::from_millis(60));
        let id = JobId::new();

        store.apply(leases.acquire(WriteBatch::new(), id)).unwrap();
        let guard = leases.start_heartbeat(id);
        thread::sleep(Duration::from_millis(200));
        assert!(leases.is_held(id).unwrap());

        guard.stop();
        thread::sleep(Duration::from_millis(120));
        assert!(!leases.is_held(id).unwrap());
    }

    #[test]
    fn unparsable_markers_are_skipped() {
        let (store, leases) = manager(DEFAULT_LEASE_TTL);
        store.apply(WriteBatch::new().set("inflight:garbage", "1")).unwrap();

        assert!(leases.in_flight().unwrap().is_empty());
    }
}
