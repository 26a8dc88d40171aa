//! Dead-letter replay.

use tracing::{info, warn};

use crate::store::{keys, QueueStore, StoreError, StoreResult, WriteBatch};

/// Move up to `limit` jobs from the DLQ back to the default queue.
///
/// Each job keeps its id, type, payload and attempt count; status goes back to
/// `queued` and the last error is cleared. Malformed DLQ entries are dropped
/// and do not count. Returns the number of jobs moved.
pub fn replay_dead_letters<S: QueueStore + ?Sized>(store: &S, limit: i64) -> StoreResult<usize> {
    let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
    let mut moved = 0;

    for _ in 0..limit {
        let mut job = match store.pop(keys::DEAD_LETTER_QUEUE) {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(StoreError::Malformed(reason)) => {
                warn!(error = %reason, "skipping malformed DLQ entry");
                continue;
            }
            Err(e) => return Err(e),
        };

        job.reset_for_replay();
        store.apply(
            WriteBatch::new()
                .put_job(&job)
                .push(keys::DEFAULT_QUEUE, &job),
        )?;
        moved += 1;
    }

    if moved > 0 {
        info!(requeued = moved, "replayed dead letters");
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use queuey_core::{Job, JobStatus, NewJob};

    use super::*;
    use crate::store::InMemoryQueueStore;

    fn dead_job(store: &InMemoryQueueStore) -> Job {
        let payload = json!({"n": "four"}).as_object().cloned().unwrap();
        let mut job = Job::create(
            NewJob::new("math.square", payload).with_max_attempts(1),
            Utc::now(),
        )
        .unwrap();
        job.mark_running(Utc::now());
        job.record_failure("payload.n must be a number");
        job.mark_dead_letter(Utc::now());
        store
            .apply(WriteBatch::new().put_job(&job).push(keys::DEAD_LETTER_QUEUE, &job))
            .unwrap();
        job
    }

    #[test]
    fn replay_resets_status_and_error_and_keeps_identity() {
        let store = InMemoryQueueStore::new();
        let original = dead_job(&store);

        assert_eq!(replay_dead_letters(&store, 100).unwrap(), 1);

        let job = store.get_job(original.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.last_error.is_none());
        assert_eq!(job.id, original.id);
        assert_eq!(job.job_type, original.job_type);
        assert_eq!(job.payload, original.payload);
        assert_eq!(job.attempts, original.attempts);

        assert_eq!(store.queue_len(keys::DEAD_LETTER_QUEUE).unwrap(), 0);
        assert_eq!(store.list_snapshot(keys::DEFAULT_QUEUE).unwrap(), vec![job]);
    }

    #[test]
    fn replay_honours_limit() {
        let store = InMemoryQueueStore::new();
        for _ in 0..3 {
            dead_job(&store);
        }

        assert_eq!(replay_dead_letters(&store, 2).unwrap(), 2);
        assert_eq!(store.queue_len(keys::DEAD_LETTER_QUEUE).unwrap(), 1);
        assert_eq!(replay_dead_letters(&store, -5).unwrap(), 0);
        assert_eq!(store.queue_len(keys::DEAD_LETTER_QUEUE).unwrap(), 1);
    }

    #[test]
    fn malformed_entries_are_skipped_without_aborting() {
        let store = InMemoryQueueStore::new();
        dead_job(&store);
        store.push_raw(keys::DEAD_LETTER_QUEUE, "garbage").unwrap();
        dead_job(&store);

        assert_eq!(replay_dead_letters(&store, 10).unwrap(), 2);
        assert_eq!(store.queue_len(keys::DEFAULT_QUEUE).unwrap(), 2);
        assert_eq!(store.queue_len(keys::DEAD_LETTER_QUEUE).unwrap(), 0);
    }
}
