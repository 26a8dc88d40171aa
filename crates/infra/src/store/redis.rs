//! Redis-backed queue store.
//!
//! ## Layout
//!
//! - **Job records**: `job:{id}` (JSON string)
//! - **Queues**: `queue:default`, `queue:dlq` (lists, RPUSH/BLPOP)
//! - **Retry schedule**: `queue:retry` (sorted set scored by due time in ms)
//! - **Markers**: `dedupe:{key}`, `lease:{id}` (with TTL), `inflight:{id}`
//!
//! Batches run inside `MULTI`/`EXEC`. Scheduled promotion uses a small Lua
//! script so that only the caller whose `ZREM` wins writes the job back.
//! Blocking pops use fractional `BLPOP` timeouts (Redis 6+).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use queuey_core::{Job, JobId};

use super::{decode, encode, keys, QueueStore, StoreError, StoreOp, StoreResult, WriteBatch};

/// SCAN page size hint.
const SCAN_COUNT: usize = 200;

/// KEYS[1]=schedule, KEYS[2]=job record, KEYS[3]=queue; ARGV[1]=member, ARGV[2]=new record.
///
/// Returns 1 when promoted, 0 when another caller already took the member and
/// 2 when the job record is already terminal (the member is dropped).
const PROMOTE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
local current = redis.call('GET', KEYS[2])
if current then
  local ok, record = pcall(cjson.decode, current)
  if ok and type(record) == 'table'
    and (record['status'] == 'succeeded' or record['status'] == 'dead_letter') then
    return 2
  end
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('RPUSH', KEYS[3], ARGV[2])
return 1
"#;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisQueueStore {
    client: Arc<redis::Client>,
    promote: Arc<redis::Script>,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore").finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379/0").
    ///
    /// No connection is made until the first command.
    pub fn open(redis_url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client: Arc::new(client),
            promote: Arc::new(redis::Script::new(PROMOTE_SCRIPT)),
        })
    }

    fn conn(&self) -> StoreResult<redis::Connection> {
        Ok(self.client.get_connection()?)
    }

    fn queue_op(pipe: &mut redis::Pipeline, op: StoreOp) -> StoreResult<()> {
        match op {
            StoreOp::PutJob(job) => {
                pipe.cmd("SET").arg(keys::job(job.id)).arg(encode(&job)?).ignore();
            }
            StoreOp::Push { queue, job } => {
                pipe.cmd("RPUSH").arg(queue).arg(encode(&job)?).ignore();
            }
            StoreOp::Schedule { set, job, at } => {
                pipe.cmd("ZADD")
                    .arg(set)
                    .arg(at.timestamp_millis())
                    .arg(encode(&job)?)
                    .ignore();
            }
            StoreOp::Set { key, value } => {
                pipe.cmd("SET").arg(key).arg(value).ignore();
            }
            StoreOp::SetEx { key, value, ttl } => {
                let ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(ms).ignore();
            }
            StoreOp::Delete(key) => {
                pipe.cmd("DEL").arg(key).ignore();
            }
        }
        Ok(())
    }

    fn decode_opt(raw: Option<String>) -> StoreResult<Option<Job>> {
        raw.as_deref().map(decode).transpose()
    }
}

impl QueueStore for RedisQueueStore {
    #[instrument(skip(self, batch), fields(ops = batch.ops().len()), err)]
    fn apply(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.into_ops() {
            Self::queue_op(&mut pipe, op)?;
        }

        let mut conn = self.conn()?;
        pipe.query::<()>(&mut conn)?;
        Ok(())
    }

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.conn()?;
        let raw: Option<String> = redis::cmd("GET").arg(keys::job(id)).query(&mut conn)?;
        Self::decode_opt(raw)
    }

    fn get_value(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn()?;
        Ok(redis::cmd("GET").arg(key).query(&mut conn)?)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn()?;
        let n: i64 = redis::cmd("EXISTS").arg(key).query(&mut conn)?;
        Ok(n > 0)
    }

    #[instrument(skip(self), err)]
    fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn()?;
        // SCAN may return a key more than once.
        let mut found = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query(&mut conn)?;
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(found.into_iter().collect())
    }

    fn dequeue_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<Job>> {
        // BLPOP treats 0 as "block forever".
        if timeout.is_zero() {
            return self.pop(queue);
        }
        let mut conn = self.conn()?;
        let item: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64())
            .query(&mut conn)?;
        Self::decode_opt(item.map(|(_, raw)| raw))
    }

    fn pop(&self, queue: &str) -> StoreResult<Option<Job>> {
        let mut conn = self.conn()?;
        let raw: Option<String> = redis::cmd("LPOP").arg(queue).query(&mut conn)?;
        Self::decode_opt(raw)
    }

    fn queue_len(&self, queue: &str) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        Ok(redis::cmd("LLEN").arg(queue).query(&mut conn)?)
    }

    fn scheduled_len(&self, set: &str) -> StoreResult<u64> {
        let mut conn = self.conn()?;
        Ok(redis::cmd("ZCARD").arg(set).query(&mut conn)?)
    }

    #[instrument(skip(self, prepare), level = "debug", err)]
    fn promote_due(
        &self,
        set: &str,
        queue: &str,
        now: DateTime<Utc>,
        limit: usize,
        prepare: &dyn Fn(Job) -> Job,
    ) -> StoreResult<Vec<JobId>> {
        let mut conn = self.conn()?;
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(set)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query(&mut conn)?;

        let mut promoted = Vec::new();
        for member in due {
            let job = match decode(&member) {
                Ok(job) => prepare(job),
                Err(e) => {
                    warn!(set, error = %e, "dropping malformed scheduled entry");
                    let _: i64 = redis::cmd("ZREM").arg(set).arg(&member).query(&mut conn)?;
                    continue;
                }
            };
            let id = job.id;
            let outcome: i64 = self
                .promote
                .key(set)
                .key(keys::job(id))
                .key(queue)
                .arg(&member)
                .arg(encode(&job)?)
                .invoke(&mut conn)?;
            match outcome {
                1 => promoted.push(id),
                2 => debug!(job_id = %id, "dropping scheduled retry for finished job"),
                _ => {}
            }
        }
        Ok(promoted)
    }

    fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let _: String = redis::cmd("PING").query(&mut conn)?;
        Ok(())
    }
}

/// These need a live server: `REDIS_URL=redis://localhost:6379/0 cargo test
/// --features redis -- --ignored`. Every test uses fresh key names.
#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use queuey_core::{JobStatus, NewJob, Payload};

    use super::*;

    fn store() -> RedisQueueStore {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
        RedisQueueStore::open(url).unwrap()
    }

    fn scratch(name: &str) -> String {
        format!("test:{}:{name}", JobId::new())
    }

    fn job(kind: &str) -> Job {
        Job::create(NewJob::new(kind, Payload::new()), Utc::now()).unwrap()
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn batch_writes_record_and_queue() {
        let store = store();
        let queue = scratch("queue");
        let job = job("t");

        store
            .apply(WriteBatch::new().put_job(&job).push(&queue, &job))
            .unwrap();

        assert_eq!(store.get_job(job.id).unwrap(), Some(job.clone()));
        assert_eq!(store.queue_len(&queue).unwrap(), 1);
        assert_eq!(store.pop(&queue).unwrap().map(|j| j.id), Some(job.id));

        store.apply(WriteBatch::new().delete(keys::job(job.id))).unwrap();
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn lease_keys_expire() {
        let store = store();
        let key = scratch("lease");

        store
            .apply(WriteBatch::new().set_ex(&key, "1", Duration::from_millis(100)))
            .unwrap();
        assert!(store.exists(&key).unwrap());
        assert_eq!(store.scan_keys(&key).unwrap(), vec![key.clone()]);

        thread::sleep(Duration::from_millis(250));
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn blocking_dequeue_honours_fractional_timeout() {
        let store = store();
        let queue = scratch("queue");

        let started = Instant::now();
        assert_eq!(store.dequeue_blocking(&queue, Duration::from_millis(300)).unwrap(), None);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(1), "returned after {waited:?}");
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn blocking_dequeue_wakes_on_push() {
        let store = store();
        let queue = scratch("queue");
        let job = job("t");

        let waiter = {
            let (store, queue) = (store.clone(), queue.clone());
            thread::spawn(move || store.dequeue_blocking(&queue, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(100));
        store.apply(WriteBatch::new().push(&queue, &job)).unwrap();

        assert_eq!(waiter.join().unwrap().unwrap().map(|j| j.id), Some(job.id));
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn concurrent_promotion_moves_a_due_entry_once() {
        let store = store();
        let (set, queue) = (scratch("retry"), scratch("queue"));
        let parked = job("retry");
        store
            .apply(WriteBatch::new().schedule(&set, &parked, Utc::now() - chrono::Duration::seconds(1)))
            .unwrap();

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let (store, set, queue) = (store.clone(), set.clone(), queue.clone());
                thread::spawn(move || {
                    store
                        .promote_due(&set, &queue, Utc::now(), 10, &|mut j: Job| {
                            j.mark_queued();
                            j
                        })
                        .unwrap()
                })
            })
            .collect();
        let promoted: Vec<JobId> = callers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();

        assert_eq!(promoted, vec![parked.id]);
        assert_eq!(store.queue_len(&queue).unwrap(), 1);
        assert_eq!(store.scheduled_len(&set).unwrap(), 0);
        assert_eq!(store.get_job(parked.id).unwrap().unwrap().status, JobStatus::Queued);

        store
            .apply(WriteBatch::new().delete(keys::job(parked.id)).delete(&queue))
            .unwrap();
    }

    #[test]
    #[ignore = "needs a running Redis (REDIS_URL)"]
    fn promotion_drops_retry_for_finished_job() {
        let store = store();
        let (set, queue) = (scratch("retry"), scratch("queue"));
        let now = Utc::now();
        let parked = job("retry");
        let mut finished = parked.clone();
        finished.mark_running(now);
        finished.mark_succeeded(serde_json::Value::Null, now);
        store
            .apply(
                WriteBatch::new()
                    .put_job(&finished)
                    .schedule(&set, &parked, now - chrono::Duration::seconds(1)),
            )
            .unwrap();

        let promoted = store.promote_due(&set, &queue, now, 10, &|j: Job| j).unwrap();

        assert!(promoted.is_empty());
        assert_eq!(store.scheduled_len(&set).unwrap(), 0);
        assert_eq!(store.queue_len(&queue).unwrap(), 0);
        assert_eq!(store.get_job(parked.id).unwrap().unwrap().status, JobStatus::Succeeded);

        store.apply(WriteBatch::new().delete(keys::job(parked.id))).unwrap();
    }
}
