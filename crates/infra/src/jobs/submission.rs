//! Job submission: validate, dedupe, then record and enqueue in one batch.

use chrono::Utc;
use tracing::{debug, info};

use queuey_core::{DomainError, Job, JobId, NewJob};

use super::dedupe::DedupeIndex;
use crate::store::{keys, QueueStore, StoreError, WriteBatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SubmissionService<S> {
    store: S,
    dedupe: DedupeIndex<S>,
}

impl<S: QueueStore + Clone> SubmissionService<S> {
    pub fn new(store: S, dedupe_window: std::time::Duration) -> Self {
        Self {
            dedupe: DedupeIndex::new(store.clone(), dedupe_window),
            store,
        }
    }

    /// Submit a job and return its id.
    ///
    /// A live dedupe entry short-circuits to the original job id without
    /// writing anything. Otherwise the record, the default-queue append and the
    /// dedupe entry are committed together. Two submissions racing on the same
    /// fresh key can both miss the lookup and create two jobs; the later
    /// dedupe write wins.
    pub fn submit(&self, request: NewJob) -> Result<JobId, SubmitError> {
        request.validate()?;

        let dedupe_key = request.dedupe_key().map(str::to_owned);
        if let Some(key) = dedupe_key.as_deref() {
            if let Some(existing) = self.dedupe.reserve(key)? {
                debug!(dedupe_key = key, job_id = %existing, "duplicate submission");
                return Ok(existing);
            }
        }

        let job = Job::create(request, Utc::now())?;
        let mut batch = WriteBatch::new()
            .put_job(&job)
            .push(keys::DEFAULT_QUEUE, &job);
        if let Some(key) = dedupe_key.as_deref() {
            batch = batch.op(self.dedupe.commit(key, job.id));
        }
        self.store.apply(batch)?;

        info!(job_id = %job.id, job_type = %job.job_type, max_attempts = job.max_attempts, "job submitted");
        Ok(job.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use queuey_core::{JobStatus, Payload};

    use super::*;
    use crate::jobs::dedupe::DEFAULT_DEDUPE_WINDOW;
    use crate::store::InMemoryQueueStore;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn service(window: Duration) -> (Arc<InMemoryQueueStore>, SubmissionService<Arc<InMemoryQueueStore>>) {
        let store = Arc::new(InMemoryQueueStore::new());
        (store.clone(), SubmissionService::new(store, window))
    }

    #[test]
    fn submit_records_and_enqueues() {
        let (store, svc) = service(DEFAULT_DEDUPE_WINDOW);

        let id = svc
            .submit(NewJob::new("text.reverse", payload(json!({"text": "abc"}))))
            .unwrap();

        let job = store.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload["text"], "abc");
        assert_eq!(store.list_snapshot(keys::DEFAULT_QUEUE).unwrap(), vec![job]);
    }

    #[test]
    fn blank_type_is_rejected_and_nothing_is_written() {
        let (store, svc) = service(DEFAULT_DEDUPE_WINDOW);

        let err = svc.submit(NewJob::new("", Payload::new())).unwrap_err();

        assert!(matches!(err, SubmitError::Validation(_)));
        assert_eq!(store.queue_len(keys::DEFAULT_QUEUE).unwrap(), 0);
    }

    #[test]
    fn same_dedupe_key_returns_same_job() {
        let (store, svc) = service(DEFAULT_DEDUPE_WINDOW);
        let req = NewJob::new("math.square", payload(json!({"n": 4}))).with_dedupe_key("sq-4");

        let first = svc.submit(req.clone()).unwrap();
        let second = svc.submit(req).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.queue_len(keys::DEFAULT_QUEUE).unwrap(), 1);
    }

    #[test]
    fn dedupe_key_is_reusable_after_window() {
        let (store, svc) = service(Duration::from_millis(30));
        let req = NewJob::new("math.square", payload(json!({"n": 4}))).with_dedupe_key("sq-4");

        let first = svc.submit(req.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let second = svc.submit(req).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.queue_len(keys::DEFAULT_QUEUE).unwrap(), 2);
    }

    #[test]
    fn without_dedupe_key_every_submission_is_new() {
        let (_, svc) = service(DEFAULT_DEDUPE_WINDOW);
        let req = NewJob::new("t", Payload::new());

        assert_ne!(svc.submit(req.clone()).unwrap(), svc.submit(req).unwrap());
    }
}
