//! Job lifecycle: submission, execution with retry/backoff/DLQ, and
//! lease-based crash recovery.
//!
//! ## Design
//!
//! - At-least-once: a job is never dropped by the core, but may run again if
//!   its worker dies mid-execution
//! - Retry policy with exponential backoff and jitter
//! - Dead-letter queue for jobs that exhaust their attempts, with replay
//! - Every state transition is one atomic store batch
//!
//! ## Components
//!
//! - `SubmissionService`: validates, dedupes, records and enqueues new jobs
//! - `DedupeIndex`: idempotency key -> job id, with a bounded lifetime
//! - `Worker` / `WorkerPool`: the execution loop
//! - `LeaseManager`: ephemeral ownership markers refreshed by a heartbeat
//! - `Watchdog`: requeues jobs whose lease lapsed while still in flight
//! - `replay`: DLQ replay and queue inspection

pub mod dedupe;
pub mod inspect;
pub mod lease;
pub mod replay;
pub mod submission;
pub mod watchdog;
pub mod worker;

pub use dedupe::{DedupeIndex, DEFAULT_DEDUPE_WINDOW};
pub use inspect::{find_job, queue_metrics, QueueMetrics};
pub use lease::{LeaseGuard, LeaseManager, DEFAULT_LEASE_TTL};
pub use replay::replay_dead_letters;
pub use submission::{SubmissionService, SubmitError};
pub use watchdog::{SweepReport, Watchdog, DEFAULT_SWEEP_INTERVAL};
pub use worker::{
    Outcome, RetryMode, ShutdownSignal, Worker, WorkerConfig, WorkerPool, WorkerStats,
};
