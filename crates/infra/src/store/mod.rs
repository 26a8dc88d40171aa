//! Queue store contract consumed by the job core.
//!
//! The store holds one record per job, FIFO lists for the default queue and
//! the DLQ, a due-time ordered retry schedule, and short-lived string keys
//! (dedupe entries, leases, in-flight markers). Every write goes through a
//! [`WriteBatch`] that the backend applies atomically, so a reader never sees
//! a job recorded without also seeing it enqueued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use queuey_core::{Job, JobId};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryQueueStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisQueueStore;

/// Key layout shared by every backend.
pub mod keys {
    use queuey_core::JobId;

    pub const DEFAULT_QUEUE: &str = "queue:default";
    pub const DEAD_LETTER_QUEUE: &str = "queue:dlq";
    /// Sorted by due time; holds jobs waiting out a scheduled backoff.
    pub const RETRY_SCHEDULE: &str = "queue:retry";

    pub const JOB_PREFIX: &str = "job:";
    pub const DEDUPE_PREFIX: &str = "dedupe:";
    pub const LEASE_PREFIX: &str = "lease:";
    pub const IN_FLIGHT_PREFIX: &str = "inflight:";

    pub fn job(id: JobId) -> String {
        format!("{JOB_PREFIX}{id}")
    }

    pub fn dedupe(key: &str) -> String {
        format!("{DEDUPE_PREFIX}{key}")
    }

    pub fn lease(id: JobId) -> String {
        format!("{LEASE_PREFIX}{id}")
    }

    pub fn in_flight(id: JobId) -> String {
        format!("{IN_FLIGHT_PREFIX}{id}")
    }

    pub fn pattern(prefix: &str) -> String {
        format!("{prefix}*")
    }

    /// Recover the job id from a namespaced key such as `inflight:<uuid>`.
    pub fn job_id_from(key: &str, prefix: &str) -> Option<JobId> {
        key.strip_prefix(prefix)?.parse().ok()
    }
}

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded. The offending item has already
    /// been consumed when this is returned from a pop.
    #[error("malformed record: {0}")]
    Malformed(String),
    /// In-memory lock poisoning.
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Upsert the full job record under `job:{id}`.
    PutJob(Job),
    /// Append a job snapshot to the tail of a list.
    Push { queue: String, job: Job },
    /// Add a job snapshot to a schedule, due at `at`.
    Schedule {
        set: String,
        job: Job,
        at: DateTime<Utc>,
    },
    Set { key: String, value: String },
    /// Set with a time-to-live; the key disappears on its own afterwards.
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete(String),
}

/// Writes applied together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<StoreOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, op: StoreOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn put_job(self, job: &Job) -> Self {
        self.op(StoreOp::PutJob(job.clone()))
    }

    pub fn push(self, queue: &str, job: &Job) -> Self {
        self.op(StoreOp::Push {
            queue: queue.to_string(),
            job: job.clone(),
        })
    }

    pub fn schedule(self, set: &str, job: &Job, at: DateTime<Utc>) -> Self {
        self.op(StoreOp::Schedule {
            set: set.to_string(),
            job: job.clone(),
            at,
        })
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.op(StoreOp::Set {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn set_ex(self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.op(StoreOp::SetEx {
            key: key.into(),
            value: value.into(),
            ttl,
        })
    }

    pub fn delete(self, key: impl Into<String>) -> Self {
        self.op(StoreOp::Delete(key.into()))
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Operations the job core requires of its backing store.
pub trait QueueStore: Send + Sync {
    /// Apply every op in `batch` atomically.
    fn apply(&self, batch: WriteBatch) -> StoreResult<()>;

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    fn get_value(&self, key: &str) -> StoreResult<Option<String>>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Keys matching a glob pattern (`*` only). Order is unspecified.
    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Pop the head of `queue`, waiting up to `timeout` for one to arrive.
    /// Each item is handed to exactly one caller.
    fn dequeue_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<Job>>;

    /// Pop the head of `queue` without waiting.
    fn pop(&self, queue: &str) -> StoreResult<Option<Job>>;

    fn queue_len(&self, queue: &str) -> StoreResult<u64>;

    fn scheduled_len(&self, set: &str) -> StoreResult<u64>;

    /// Move up to `limit` entries of `set` that are due at `now` onto `queue`.
    ///
    /// Each moved job is rewritten with `prepare` and stored under `job:{id}`
    /// in the same step. An entry is promoted at most once even when several
    /// callers race. An entry whose current `job:{id}` record is already
    /// terminal is removed from `set` without being promoted. Returns the
    /// promoted ids.
    fn promote_due(
        &self,
        set: &str,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
        prepare: &dyn Fn(Job) -> Job,
    ) -> StoreResult<Vec<JobId>>;

    fn ping(&self) -> StoreResult<()>;

    fn put_job(&self, job: &Job) -> StoreResult<()> {
        self.apply(WriteBatch::new().put_job(job))
    }
}

impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        (**self).apply(batch)
    }

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        (**self).get_job(id)
    }

    fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get_value(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        (**self).scan_keys(pattern)
    }

    fn dequeue_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<Job>> {
        (**self).dequeue_blocking(queue, timeout)
    }

    fn pop(&self, queue: &str) -> StoreResult<Option<Job>> {
        (**self).pop(queue)
    }

    fn queue_len(&self, queue: &str) -> StoreResult<u64> {
        (**self).queue_len(queue)
    }

    fn scheduled_len(&self, set: &str) -> StoreResult<u64> {
        (**self).scheduled_len(set)
    }

    fn promote_due(
        &self,
        set: &str,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
        prepare: &dyn Fn(Job) -> Job,
    ) -> StoreResult<Vec<JobId>> {
        (**self).promote_due(set, queue, now, limit, prepare)
    }

    fn ping(&self) -> StoreResult<()> {
        (**self).ping()
    }
}

/// Which backend a process should talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Shared, type-erased store handle injected into every component.
pub type SharedStore = Arc<dyn QueueStore>;

/// Construct the store once at startup.
pub fn open(backend: StoreBackend, redis_url: &str) -> StoreResult<SharedStore> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryQueueStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisQueueStore::open(redis_url)?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            let _ = redis_url;
            Err(StoreError::Unavailable(
                "built without the `redis` feature".to_string(),
            ))
        }
    }
}

pub(crate) fn encode(job: &Job) -> StoreResult<String> {
    serde_json::to_string(job).map_err(|e| StoreError::Malformed(e.to_string()))
}

pub(crate) fn decode(raw: &str) -> StoreResult<Job> {
    serde_json::from_str(raw).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Glob match supporting `*` (any run of characters).
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !candidate.starts_with(first) || candidate.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &candidate[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_prefix_patterns() {
        assert!(glob_match("lease:*", "lease:abc"));
        assert!(glob_match("lease:*", "lease:"));
        assert!(!glob_match("lease:*", "inflight:abc"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[test]
    fn job_id_round_trips_through_keys() {
        let id = JobId::new();
        let key = keys::in_flight(id);
        assert_eq!(keys::job_id_from(&key, keys::IN_FLIGHT_PREFIX), Some(id));
        assert_eq!(keys::job_id_from("inflight:nope", keys::IN_FLIGHT_PREFIX), None);
    }

    #[test]
    fn batch_builder_keeps_op_order() {
        let job = Job::create(
            queuey_core::NewJob::new("t", Default::default()),
            Utc::now(),
        )
        .unwrap();
        let batch = WriteBatch::new()
            .put_job(&job)
            .push(keys::DEFAULT_QUEUE, &job)
            .delete("x");

        assert!(matches!(batch.ops()[0], StoreOp::PutJob(_)));
        assert!(matches!(batch.ops()[1], StoreOp::Push { .. }));
        assert_eq!(batch.ops()[2], StoreOp::Delete("x".into()));
    }
}
