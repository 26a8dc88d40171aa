//! Infrastructure layer: the queue store, the job lifecycle services built on
//! it, and process configuration.

pub mod config;
pub mod jobs;
pub mod store;

pub use config::{ConfigError, QueueConfig};
pub use store::{open, QueueStore, SharedStore, StoreBackend, StoreError, StoreResult};
