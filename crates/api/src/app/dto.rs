use serde::{Deserialize, Serialize};

use queuey_core::{NewJob, Payload};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    /// Absent and `null` both mean an empty payload.
    #[serde(default)]
    pub payload: Option<Payload>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<i64>,
}

impl SubmitJobRequest {
    pub fn into_new_job(self) -> NewJob {
        let mut job = NewJob::new(self.job_type, self.payload.unwrap_or_default());
        if let Some(key) = self.dedupe_key {
            job = job.with_dedupe_key(key);
        }
        if let Some(max) = self.max_attempts {
            job = job.with_max_attempts(max);
        }
        job
    }
}

pub const DEFAULT_REPLAY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    #[serde(default = "default_replay_limit")]
    pub limit: i64,
}

fn default_replay_limit() -> i64 {
    DEFAULT_REPLAY_LIMIT
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub requeued: usize,
}
