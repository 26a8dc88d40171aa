//! Idempotency keys: `dedupe:{key}` -> job id, expiring after a fixed window.

use std::time::Duration;

use tracing::warn;

use queuey_core::JobId;

use crate::store::{keys, QueueStore, StoreOp, StoreResult};

/// Entries live for 24 hours regardless of job outcome.
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct DedupeIndex<S> {
    store: S,
    window: Duration,
}

impl<S: QueueStore> DedupeIndex<S> {
    pub fn new(store: S, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Look up the job previously created for `key`, if the entry is still live.
    pub fn reserve(&self, key: &str) -> StoreResult<Option<JobId>> {
        let Some(raw) = self.store.get_value(&keys::dedupe(key))? else {
            return Ok(None);
        };
        match raw.parse::<JobId>() {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                // Treat as absent; the next commit overwrites it.
                warn!(dedupe_key = key, error = %e, "ignoring malformed dedupe entry");
                Ok(None)
            }
        }
    }

    /// The write recording `key -> job_id`. Callers put it in the same batch as
    /// the job record and its queue append.
    pub fn commit(&self, key: &str, job_id: JobId) -> StoreOp {
        StoreOp::SetEx {
            key: keys::dedupe(key),
            value: job_id.to_string(),
            ttl: self.window,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{InMemoryQueueStore, WriteBatch};

    #[test]
    fn committed_key_is_found() {
        let store = Arc::new(InMemoryQueueStore::new());
        let index = DedupeIndex::new(store.clone(), DEFAULT_DEDUPE_WINDOW);
        let id = JobId::new();

        assert_eq!(index.reserve("order-1").unwrap(), None);
        store.apply(WriteBatch::new().op(index.commit("order-1", id))).unwrap();
        assert_eq!(index.reserve("order-1").unwrap(), Some(id));
    }

    #[test]
    fn entry_expires_after_window() {
        let store = Arc::new(InMemoryQueueStore::new());
        let index = DedupeIndex::new(store.clone(), Duration::from_millis(20));

        store
            .apply(WriteBatch::new().op(index.commit("k", JobId::new())))
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(index.reserve("k").unwrap(), None);
    }

    #[test]
    fn malformed_entry_reads_as_absent() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.set_raw(&keys::dedupe("k"), "garbage").unwrap();
        let index = DedupeIndex::new(store, DEFAULT_DEDUPE_WINDOW);

        assert_eq!(index.reserve("k").unwrap(), None);
    }
}
