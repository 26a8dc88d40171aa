//! Recovery loop: returns jobs abandoned by crashed workers to the queue.
//!
//! A sweep walks the in-flight markers. A marker whose lease key is gone means
//! the owning worker stopped heart-beating without finishing its transition.
//! If the record still says `running` (or `failed_retry_pending`, for a worker
//! that died mid-backoff) it is reset to `queued` and re-appended. Attempts
//! are not touched: a crash is not a failed attempt.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use queuey_core::JobId;

use super::lease::LeaseManager;
use super::worker::ShutdownSignal;
use crate::store::{keys, QueueStore, StoreError, StoreResult, WriteBatch};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// In-flight markers examined.
    pub scanned: usize,
    /// Jobs put back on the default queue.
    pub recovered: Vec<JobId>,
    /// Stale markers removed without requeueing.
    pub cleared: usize,
    /// Entries that failed and were left for the next sweep.
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    LeaseHeld,
    Requeued,
    Cleared,
}

#[derive(Debug, Clone)]
pub struct Watchdog<S> {
    store: S,
    leases: LeaseManager<S>,
    interval: Duration,
}

impl<S: QueueStore + Clone + 'static> Watchdog<S> {
    pub fn new(store: S, lease_ttl: Duration, interval: Duration) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), lease_ttl),
            store,
            interval,
        }
    }

    /// Examine every in-flight job once.
    pub fn sweep(&self) -> StoreResult<SweepReport> {
        let in_flight = self.leases.in_flight()?;
        let mut report = SweepReport {
            scanned: in_flight.len(),
            ..Default::default()
        };

        for id in in_flight {
            match self.recover(id) {
                Ok(Recovery::LeaseHeld) => {}
                Ok(Recovery::Requeued) => report.recovered.push(id),
                Ok(Recovery::Cleared) => report.cleared += 1,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "recovery check failed");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }

    fn recover(&self, id: JobId) -> StoreResult<Recovery> {
        if self.leases.is_held(id)? {
            return Ok(Recovery::LeaseHeld);
        }

        let clear = WriteBatch::new().delete(keys::in_flight(id));
        match self.store.get_job(id) {
            Ok(Some(mut job)) if job.status.is_in_flight() => {
                let was = job.status;
                job.mark_queued();
                self.store.apply(
                    clear.put_job(&job).push(keys::DEFAULT_QUEUE, &job),
                )?;
                info!(job_id = %id, was = %was, attempts = job.attempts, "requeued job (lease expired)");
                Ok(Recovery::Requeued)
            }
            Ok(_) => {
                self.store.apply(clear)?;
                debug!(job_id = %id, "cleared stale in-flight marker");
                Ok(Recovery::Cleared)
            }
            Err(StoreError::Malformed(reason)) => {
                warn!(job_id = %id, error = %reason, "job record is malformed; dropping in-flight marker");
                self.store.apply(clear)?;
                Ok(Recovery::Cleared)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep every `interval` until `shutdown` is triggered.
    pub fn run(&self, shutdown: &ShutdownSignal) {
        info!(interval_ms = self.interval.as_millis() as u64, "watchdog started");

        while !shutdown.is_triggered() {
            match self.sweep() {
                Ok(report) if !report.recovered.is_empty() || report.errors > 0 => {
                    info!(
                        scanned = report.scanned,
                        recovered = report.recovered.len(),
                        cleared = report.cleared,
                        errors = report.errors,
                        "watchdog sweep"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "watchdog sweep failed"),
            }
            shutdown.sleep(self.interval);
        }

        info!("watchdog stopped");
    }

    /// Run the loop on a background thread.
    pub fn spawn(self, shutdown: ShutdownSignal) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || self.run(&shutdown))
    }
}
