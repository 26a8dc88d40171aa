//! Read-only views used by the API: job lookup and queue depths.

use serde::Serialize;

use queuey_core::{Job, JobId};

use crate::store::{keys, QueueStore, StoreResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub queue_default_length: u64,
    pub queue_dlq_length: u64,
    /// Jobs waiting out a scheduled backoff.
    pub queue_retry_length: u64,
}

pub fn find_job<S: QueueStore + ?Sized>(store: &S, id: JobId) -> StoreResult<Option<Job>> {
    store.get_job(id)
}

pub fn queue_metrics<S: QueueStore + ?Sized>(store: &S) -> StoreResult<QueueMetrics> {
    Ok(QueueMetrics {
        queue_default_length: store.queue_len(keys::DEFAULT_QUEUE)?,
        queue_dlq_length: store.queue_len(keys::DEAD_LETTER_QUEUE)?,
        queue_retry_length: store.scheduled_len(keys::RETRY_SCHEDULE)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use queuey_core::{NewJob, Payload};

    use super::*;
    use crate::store::{InMemoryQueueStore, WriteBatch};

    #[test]
    fn metrics_report_each_queue() {
        let store = InMemoryQueueStore::new();
        let job = Job::create(NewJob::new("t", Payload::new()), Utc::now()).unwrap();
        store
            .apply(
                WriteBatch::new()
                    .push(keys::DEFAULT_QUEUE, &job)
                    .push(keys::DEFAULT_QUEUE, &job)
                    .push(keys::DEAD_LETTER_QUEUE, &job)
                    .schedule(keys::RETRY_SCHEDULE, &job, Utc::now()),
            )
            .unwrap();

        assert_eq!(
            queue_metrics(&store).unwrap(),
            QueueMetrics {
                queue_default_length: 2,
                queue_dlq_length: 1,
                queue_retry_length: 1,
            }
        );
    }

    #[test]
    fn missing_job_is_none() {
        let store = InMemoryQueueStore::new();
        assert_eq!(find_job(&store, JobId::new()).unwrap(), None);
    }
}
