//! The job record and its lifecycle transitions.
//!
//! A [`Job`] is a complete, self-describing snapshot: everything a reader needs
//! to interpret it lives in the record itself. The transition methods below are
//! the only places that mutate status, attempts, timestamps, result and error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Opaque structured payload (string keys to arbitrary JSON values).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Attempt ceiling used when the submitter does not provide one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Job lifecycle status.
///
/// ```text
/// queued --dequeue--> running --success--> succeeded
/// running --failure, attempts < max--> failed_retry_pending --backoff--> queued
/// running --failure, attempts == max--> dead_letter
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the default queue.
    Queued,
    /// Owned by a worker.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed, waiting out its backoff before being queued again.
    FailedRetryPending,
    /// Exhausted its attempts and moved to the DLQ.
    DeadLetter,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::DeadLetter)
    }

    /// Statuses in which some worker is (or was) holding the job.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::FailedRetryPending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedRetryPending => "failed_retry_pending",
            JobStatus::DeadLetter => "dead_letter",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to create a job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub payload: Payload,
    pub dedupe_key: Option<String>,
    /// Requested attempt ceiling; coerced to at least 1.
    pub max_attempts: Option<i64>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            dedupe_key: None,
            max_attempts: None,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// The dedupe key, treating an empty string as absent.
    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.job_type.trim().is_empty() {
            return Err(DomainError::validation("type must be a non-empty string"));
        }
        Ok(())
    }

    fn effective_max_attempts(&self) -> u32 {
        match self.max_attempts {
            None => DEFAULT_MAX_ATTEMPTS,
            Some(n) => n.clamp(1, i64::from(u32::MAX)) as u32,
        }
    }
}

/// The unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// When a scheduled retry becomes due. Only set while `failed_retry_pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Job {
    /// Build a fresh `queued` record from a validated request.
    pub fn create(request: NewJob, now: DateTime<Utc>) -> DomainResult<Self> {
        request.validate()?;
        let max_attempts = request.effective_max_attempts();
        let dedupe_key = request.dedupe_key().map(str::to_owned);

        Ok(Self {
            id: JobId::new(),
            job_type: request.job_type,
            payload: request.payload,
            dedupe_key,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            created_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
            result: None,
            next_attempt_at: None,
        })
    }

    /// Mark job as owned by a worker. `started_at` is only set the first time.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.next_attempt_at = None;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn mark_succeeded(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Succeeded;
        self.result = Some(result);
        self.finished_at = Some(now);
    }

    /// Count a failed attempt and remember why.
    ///
    /// Returns `true` when the job still has attempts left.
    pub fn record_failure(&mut self, error: impl core::fmt::Display) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.has_attempts_left()
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Failed, waiting for backoff. `due` is set when the retry is timer-driven.
    pub fn mark_retry_pending(&mut self, due: Option<DateTime<Utc>>) {
        self.status = JobStatus::FailedRetryPending;
        self.next_attempt_at = due;
    }

    /// Back to the default queue (after backoff, or recovered from a dead worker).
    /// Attempts are left untouched.
    pub fn mark_queued(&mut self) {
        self.status = JobStatus::Queued;
        self.next_attempt_at = None;
    }

    pub fn mark_dead_letter(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::DeadLetter;
        self.next_attempt_at = None;
        self.finished_at = Some(now);
    }

    /// Operator replay out of the DLQ: queued again with the error cleared.
    pub fn reset_for_replay(&mut self) {
        self.mark_queued();
        self.last_error = None;
        self.finished_at = None;
    }
}
