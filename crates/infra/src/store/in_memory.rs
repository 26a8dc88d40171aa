//! In-memory queue store for tests/dev.
//!
//! Mirrors the Redis key layout: job records and markers are stored as
//! serialized strings, so decode failures behave the same way as in
//! production. Expiry is checked on access, and expired keys are swept out
//! whenever keys are scanned (the watchdog scans on every sweep).

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use queuey_core::{Job, JobId};

use super::{decode, encode, glob_match, keys, QueueStore, StoreError, StoreOp, StoreResult, WriteBatch};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    /// Per set, entries kept sorted by due time (stable for equal times).
    schedules: HashMap<String, Vec<(DateTime<Utc>, String)>>,
}

impl State {
    fn live_value(&mut self, key: &str) -> Option<&str> {
        let now = Instant::now();
        if self.values.get(key).is_some_and(|e| !e.is_live(now)) {
            self.values.remove(key);
        }
        self.values.get(key).map(|e| e.value.as_str())
    }

    fn pop_front(&mut self, queue: &str) -> Option<String> {
        self.lists.get_mut(queue).and_then(VecDeque::pop_front)
    }

    fn push_back(&mut self, queue: &str, raw: String) {
        self.lists.entry(queue.to_string()).or_default().push_back(raw);
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: Mutex<State>,
    pushed: Condvar,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Append a raw, possibly undecodable, entry to a list.
    pub fn push_raw(&self, queue: &str, raw: impl Into<String>) -> StoreResult<()> {
        self.lock()?.push_back(queue, raw.into());
        self.pushed.notify_all();
        Ok(())
    }

    /// Store a raw value under `key`, bypassing job encoding.
    pub fn set_raw(&self, key: &str, raw: impl Into<String>) -> StoreResult<()> {
        self.lock()?.values.insert(
            key.to_string(),
            Entry {
                value: raw.into(),
                expires_at: None,
            },
        );
        Ok(())
    }

    /// Snapshot of a list's contents, head first.
    pub fn list_snapshot(&self, queue: &str) -> StoreResult<Vec<Job>> {
        let state = self.lock()?;
        state
            .lists
            .get(queue)
            .map(|items| items.iter().map(|raw| decode(raw)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn apply_op(state: &mut State, op: StoreOp) -> StoreResult<()> {
        match op {
            StoreOp::PutJob(job) => {
                let raw = encode(&job)?;
                state.values.insert(
                    keys::job(job.id),
                    Entry {
                        value: raw,
                        expires_at: None,
                    },
                );
            }
            StoreOp::Push { queue, job } => {
                let raw = encode(&job)?;
                state.push_back(&queue, raw);
            }
            StoreOp::Schedule { set, job, at } => {
                let raw = encode(&job)?;
                let entries = state.schedules.entry(set).or_default();
                let pos = entries.partition_point(|(due, _)| *due <= at);
                entries.insert(pos, (at, raw));
            }
            StoreOp::Set { key, value } => {
                state.values.insert(
                    key,
                    Entry {
                        value,
                        expires_at: None,
                    },
                );
            }
            StoreOp::SetEx { key, value, ttl } => {
                state.values.insert(
                    key,
                    Entry {
                        value,
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
            }
            StoreOp::Delete(key) => {
                state.values.remove(&key);
            }
        }
        Ok(())
    }
}

impl QueueStore for InMemoryQueueStore {
    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        // Encode everything up front so a bad op leaves the state untouched.
        for op in batch.ops() {
            match op {
                StoreOp::PutJob(job) | StoreOp::Push { job, .. } | StoreOp::Schedule { job, .. } => {
                    encode(job)?;
                }
                _ => {}
            }
        }

        let mut state = self.lock()?;
        let mut pushed = false;
        for op in batch.into_ops() {
            pushed |= matches!(op, StoreOp::Push { .. });
            Self::apply_op(&mut state, op)?;
        }
        drop(state);

        if pushed {
            self.pushed.notify_all();
        }
        Ok(())
    }

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let mut state = self.lock()?;
        state.live_value(&keys::job(id)).map(decode).transpose()
    }

    fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        let mut state = self.lock()?;
        Ok(state.live_value(key).map(str::to_owned))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(state.live_value(key).is_some())
    }

    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut state = self.lock()?;
        state.values.retain(|_, e| e.is_live(now));
        Ok(state
            .values
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn dequeue_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<Job>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        loop {
            if let Some(raw) = state.pop_front(queue) {
                return decode(&raw).map(Some);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .pushed
                .wait_timeout(state, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            state = guard;
        }
    }

    fn pop(&self, queue: &str) -> StoreResult<Option<Job>> {
        let raw = self.lock()?.pop_front(queue);
        raw.map(|raw| decode(&raw)).transpose()
    }

    fn queue_len(&self, queue: &str) -> StoreResult<u64> {
        let state = self.lock()?;
        Ok(state.lists.get(queue).map_or(0, |l| l.len() as u64))
    }

    fn scheduled_len(&self, set: &str) -> StoreResult<u64> {
        let state = self.lock()?;
        Ok(state.schedules.get(set).map_or(0, |s| s.len() as u64))
    }

    fn promote_due(
        &self,
        set: &str,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
        prepare: &dyn Fn(Job) -> Job,
    ) -> StoreResult<Vec<JobId>> {
        let mut state = self.lock()?;
        let due: Vec<String> = match state.schedules.get_mut(set) {
            Some(entries) => {
                let ready = entries.partition_point(|(at, _)| *at <= now).min(limit);
                entries.drain(..ready).map(|(_, raw)| raw).collect()
            }
            None => return Ok(Vec::new()),
        };

        let mut promoted = Vec::with_capacity(due.len());
        for raw in due {
            let job = match decode(&raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!(set, error = %e, "dropping malformed scheduled entry");
                    continue;
                }
            };
            let current = state.live_value(&keys::job(job.id)).map(decode);
            if let Some(Ok(current)) = current {
                if current.status.is_terminal() {
                    debug!(job_id = %job.id, status = %current.status, "dropping scheduled retry for finished job");
                    continue;
                }
            }
            let job = prepare(job);
            let id = job.id;
            Self::apply_op(&mut state, StoreOp::PutJob(job.clone()))?;
            Self::apply_op(
                &mut state,
                StoreOp::Push {
                    queue: queue.to_string(),
                    job,
                },
            )?;
            promoted.push(id);
        }
        drop(state);

        if !promoted.is_empty() {
            self.pushed.notify_all();
        }
        Ok(promoted)
    }

    fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}
