//! `queuey-core`: job domain building blocks.
//!
//! This crate contains the **pure domain** of the queue: the job record and its
//! lifecycle transitions, the retry backoff policy, and the handler registry.
//! Nothing in here performs IO.

pub mod backoff;
pub mod builtin;
pub mod error;
pub mod handler;
pub mod id;
pub mod job;

pub use backoff::BackoffPolicy;
pub use error::{DomainError, DomainResult};
pub use handler::{ExecutionError, HandlerError, HandlerRegistry, JobHandler};
pub use id::JobId;
pub use job::{Job, JobStatus, NewJob, Payload, DEFAULT_MAX_ATTEMPTS};
