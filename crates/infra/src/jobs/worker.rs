//! The execution loop: dequeue, run, and apply the retry/backoff/DLQ policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use queuey_core::{BackoffPolicy, ExecutionError, HandlerRegistry, Job, JobId};

use super::lease::{LeaseGuard, LeaseManager, DEFAULT_LEASE_TTL};
use crate::store::{keys, QueueStore, StoreError, StoreResult, WriteBatch};

/// How a failed job waits out its backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Park the job on the retry schedule and free the worker immediately.
    Scheduled,
    /// Sleep inside the worker, keeping the lease alive, then requeue.
    /// One worker is tied up per backing-off job.
    Inline,
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Bound on each blocking dequeue, so shutdown is noticed
    pub poll_timeout: Duration,
    /// Pause after an error not tied to a job
    pub error_pause: Duration,
    pub retry_mode: RetryMode,
    pub backoff: BackoffPolicy,
    pub lease_ttl: Duration,
    /// Max scheduled retries promoted per iteration
    pub promote_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            poll_timeout: Duration::from_secs(2),
            error_pause: Duration::from_secs(1),
            retry_mode: RetryMode::Scheduled,
            backoff: BackoffPolicy::default(),
            lease_ttl: DEFAULT_LEASE_TTL,
            promote_batch: 100,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_mode(mut self, mode: RetryMode) -> Self {
        self.retry_mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }
}

/// Process-wide stop flag, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early if shutdown is requested.
    pub fn sleep(&self, duration: Duration) {
        const SLICE: Duration = Duration::from_millis(100);
        let mut left = duration;
        while !left.is_zero() && !self.is_triggered() {
            let step = left.min(SLICE);
            thread::sleep(step);
            left -= step;
        }
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub jobs_skipped: u64,
    pub retries_promoted: u64,
    pub loop_errors: u64,
}

impl WorkerStats {
    fn merge(&mut self, other: &WorkerStats) {
        self.jobs_processed += other.jobs_processed;
        self.jobs_succeeded += other.jobs_succeeded;
        self.jobs_retried += other.jobs_retried;
        self.jobs_dead_lettered += other.jobs_dead_lettered;
        self.jobs_skipped += other.jobs_skipped;
        self.retries_promoted += other.retries_promoted;
        self.loop_errors += other.loop_errors;
    }
}

/// What happened to a dequeued job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded,
    /// Parked on the retry schedule.
    RetryScheduled { attempts: u32, delay: Duration },
    /// Slept in the worker and went back on the default queue.
    Requeued { attempts: u32, delay: Duration },
    DeadLettered { attempts: u32 },
    /// Stale queue entry for a job that already finished.
    Skipped,
}

/// One execution loop instance.
pub struct Worker<S> {
    store: S,
    registry: Arc<HandlerRegistry>,
    leases: LeaseManager<S>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S: QueueStore + Clone + 'static> Worker<S> {
    pub fn new(store: S, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            leases: LeaseManager::new(store.clone(), config.lease_ttl),
            store,
            registry,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut s) = self.stats.lock() {
            f(&mut s);
        }
    }

    /// Run until `shutdown` is triggered. A job in progress is always carried
    /// through its current transition before the loop exits.
    pub fn run(&self, shutdown: &ShutdownSignal) {
        info!(worker = %self.config.name, "worker started");

        while !shutdown.is_triggered() {
            if let Err(e) = self.run_once() {
                error!(worker = %self.config.name, error = %e, "worker loop error");
                self.record(|s| s.loop_errors += 1);
                shutdown.sleep(self.config.error_pause);
            }
        }

        info!(worker = %self.config.name, stats = ?self.stats(), "worker stopped");
    }

    /// One iteration: promote due retries, wait for a job, process it.
    ///
    /// `Ok(None)` means the dequeue timed out (or dropped a malformed entry).
    pub fn run_once(&self) -> StoreResult<Option<Outcome>> {
        match self.promote_due() {
            Ok(0) => {}
            Ok(n) => debug!(worker = %self.config.name, promoted = n, "promoted due retries"),
            Err(e) => warn!(worker = %self.config.name, error = %e, "retry promotion failed"),
        }

        let job = match self
            .store
            .dequeue_blocking(keys::DEFAULT_QUEUE, self.config.poll_timeout)
        {
            Ok(Some(job)) => job,
            Ok(None) => return Ok(None),
            Err(StoreError::Malformed(reason)) => {
                warn!(worker = %self.config.name, error = %reason, "dropped malformed queue entry");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let outcome = self.process(job)?;
        self.record(|s| {
            s.jobs_processed += 1;
            match &outcome {
                Outcome::Succeeded => s.jobs_succeeded += 1,
                Outcome::RetryScheduled { .. } | Outcome::Requeued { .. } => s.jobs_retried += 1,
                Outcome::DeadLettered { .. } => s.jobs_dead_lettered += 1,
                Outcome::Skipped => s.jobs_skipped += 1,
            }
        });
        Ok(Some(outcome))
    }

    fn promote_due(&self) -> StoreResult<usize> {
        let promoted = self.store.promote_due(
            keys::RETRY_SCHEDULE,
            keys::DEFAULT_QUEUE,
            Utc::now(),
            self.config.promote_batch,
            &|mut job: Job| {
                job.mark_queued();
                job
            },
        )?;
        let n = promoted.len();
        self.record(|s| s.retries_promoted += n as u64);
        Ok(n)
    }

    /// Drive a dequeued job through one execution attempt.
    pub fn process(&self, snapshot: Job) -> StoreResult<Outcome> {
        // The job table is authoritative over the queued snapshot.
        let mut job = match self.store.get_job(snapshot.id) {
            Ok(Some(current)) if current.status.is_terminal() => {
                warn!(job_id = %current.id, status = %current.status, "skipping queue entry for finished job");
                return Ok(Outcome::Skipped);
            }
            Ok(Some(current)) => current,
            Ok(None) | Err(StoreError::Malformed(_)) => snapshot,
            Err(e) => return Err(e),
        };

        let claimed = job.clone();
        job.mark_running(Utc::now());
        if let Err(e) = self
            .store
            .apply(self.leases.acquire(WriteBatch::new().put_job(&job), job.id))
        {
            self.return_to_queue(&claimed);
            return Err(e);
        }
        let heartbeat = self.leases.start_heartbeat(job.id);
        debug!(
            worker = %self.config.name,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
            "job started"
        );

        let executed = self.registry.execute(&job.job_type, &job.payload);

        if self.finished_elsewhere(job.id)? {
            heartbeat.stop();
            warn!(
                worker = %self.config.name,
                job_id = %job.id,
                "job was finished by another worker while this attempt ran; discarding attempt"
            );
            return Ok(Outcome::Skipped);
        }

        match executed {
            Ok(result) => {
                heartbeat.stop();
                job.mark_succeeded(result, Utc::now());
                self.store
                    .apply(self.leases.release(WriteBatch::new().put_job(&job), job.id))?;
                info!(job_id = %job.id, job_type = %job.job_type, "job succeeded");
                Ok(Outcome::Succeeded)
            }
            Err(err) => self.handle_failure(job, err, heartbeat),
        }
    }

    /// Put a dequeued job back when its `running` transition could not be
    /// written. Nothing else refers to it at that point.
    fn return_to_queue(&self, claimed: &Job) {
        match self
            .store
            .apply(WriteBatch::new().push(keys::DEFAULT_QUEUE, claimed))
        {
            Ok(()) => warn!(job_id = %claimed.id, "could not mark job running; returned it to the queue"),
            Err(e) => error!(job_id = %claimed.id, error = %e, "could not mark job running or requeue it; job is stranded"),
        }
    }

    /// A lapsed lease lets the watchdog hand a job to another worker, which
    /// may finish it before this attempt does.
    fn finished_elsewhere(&self, id: JobId) -> StoreResult<bool> {
        match self.store.get_job(id) {
            Ok(Some(current)) => Ok(current.status.is_terminal()),
            Ok(None) | Err(StoreError::Malformed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn handle_failure(
        &self,
        mut job: Job,
        err: ExecutionError,
        heartbeat: LeaseGuard,
    ) -> StoreResult<Outcome> {
        let kind = match err {
            ExecutionError::UnknownJobType(_) => "unknown_job_type",
            ExecutionError::Handler(_) => "handler_error",
        };
        let retry = job.record_failure(&err);
        let attempts = job.attempts;

        if !retry {
            heartbeat.stop();
            job.mark_dead_letter(Utc::now());
            self.store.apply(self.leases.release(
                WriteBatch::new()
                    .put_job(&job)
                    .push(keys::DEAD_LETTER_QUEUE, &job),
                job.id,
            ))?;
            warn!(job_id = %job.id, attempts, error = %err, kind, "job moved to DLQ");
            return Ok(Outcome::DeadLettered { attempts });
        }

        let delay = self.config.backoff.delay_for_attempt(attempts);
        match self.config.retry_mode {
            RetryMode::Scheduled => {
                heartbeat.stop();
                let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                job.mark_retry_pending(Some(due));
                self.store.apply(self.leases.release(
                    WriteBatch::new()
                        .put_job(&job)
                        .schedule(keys::RETRY_SCHEDULE, &job, due),
                    job.id,
                ))?;
                info!(
                    job_id = %job.id,
                    attempts,
                    error = %err,
                    kind,
                    retry_in_ms = delay.as_millis() as u64,
                    "job failed; retry scheduled"
                );
                Ok(Outcome::RetryScheduled { attempts, delay })
            }
            RetryMode::Inline => {
                // Failure is visible while we wait; the heartbeat holds the lease.
                job.mark_retry_pending(None);
                self.store.put_job(&job)?;
                info!(
                    job_id = %job.id,
                    attempts,
                    error = %err,
                    kind,
                    retry_in_ms = delay.as_millis() as u64,
                    "job failed; retrying after backoff"
                );
                thread::sleep(delay);

                heartbeat.stop();
                job.mark_queued();
                self.store.apply(self.leases.release(
                    WriteBatch::new()
                        .put_job(&job)
                        .push(keys::DEFAULT_QUEUE, &job),
                    job.id,
                ))?;
                Ok(Outcome::Requeued { attempts, delay })
            }
        }
    }
}

/// Handle to a set of worker threads sharing one shutdown signal.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: ShutdownSignal,
    workers: Vec<(thread::JoinHandle<()>, Arc<Mutex<WorkerStats>>)>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers named `{config.name}-{i}`.
    pub fn spawn<S>(
        store: S,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
        concurrency: usize,
        shutdown: ShutdownSignal,
    ) -> std::io::Result<Self>
    where
        S: QueueStore + Clone + 'static,
    {
        let mut workers = Vec::with_capacity(concurrency);
        for i in 0..concurrency.max(1) {
            let name = format!("{}-{}", config.name, i);
            let worker = Worker::new(
                store.clone(),
                registry.clone(),
                config.clone().with_name(name.clone()),
            );
            let stats = worker.stats.clone();
            let signal = shutdown.clone();

            let join = thread::Builder::new()
                .name(name)
                .spawn(move || worker.run(&signal))?;
            workers.push((join, stats));
        }

        Ok(Self { shutdown, workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Aggregate statistics across workers.
    pub fn stats(&self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for (_, stats) in &self.workers {
            if let Ok(s) = stats.lock() {
                total.merge(&s);
            }
        }
        total
    }

    /// Request graceful shutdown and wait for every worker to exit.
    pub fn shutdown(self) -> WorkerStats {
        self.shutdown.trigger();
        self.join()
    }

    /// Wait for the workers to exit once the shared signal is triggered elsewhere.
    pub fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for (join, stats) in self.workers {
            if join.join().is_err() {
                error!("worker thread panicked");
            }
            if let Ok(s) = stats.lock() {
                total.merge(&s);
            }
        }
        total
    }
}
