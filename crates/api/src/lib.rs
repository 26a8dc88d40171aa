//! HTTP API: submission, inspection, queue metrics, DLQ replay and health.

pub mod app;
pub mod middleware;
