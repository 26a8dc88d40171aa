//! Background loops owned by a process.

use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

use queuey_core::HandlerRegistry;
use queuey_infra::jobs::{ShutdownSignal, Watchdog, WorkerPool, WorkerStats};
use queuey_infra::{QueueConfig, SharedStore};

/// The worker pool and/or watchdog a process runs, stopped together.
#[derive(Debug)]
pub struct Background {
    shutdown: ShutdownSignal,
    pool: Option<WorkerPool>,
    watchdog: Option<JoinHandle<()>>,
}

impl Background {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            pool: None,
            watchdog: None,
        }
    }

    /// Start `config.worker_concurrency` Execution Loops.
    pub fn with_workers(
        mut self,
        store: SharedStore,
        registry: Arc<HandlerRegistry>,
        config: &QueueConfig,
    ) -> std::io::Result<Self> {
        let pool = WorkerPool::spawn(
            store,
            registry,
            config.worker_config("worker"),
            config.worker_concurrency,
            self.shutdown.clone(),
        )?;
        info!(
            workers = pool.len(),
            retry_mode = ?config.retry_mode,
            "worker pool started"
        );
        self.pool = Some(pool);
        Ok(self)
    }

    /// Start the Recovery Loop.
    pub fn with_watchdog(mut self, store: SharedStore, config: &QueueConfig) -> std::io::Result<Self> {
        let watchdog = Watchdog::new(store, config.lease_ttl, config.watchdog_interval);
        self.watchdog = Some(watchdog.spawn(self.shutdown.clone())?);
        Ok(self)
    }

    /// Signal every loop and wait for it to finish its current step.
    ///
    /// Blocks; call from a blocking context.
    pub fn stop(self) -> WorkerStats {
        self.shutdown.trigger();

        let stats = self.pool.map(WorkerPool::join).unwrap_or_default();
        if let Some(handle) = self.watchdog {
            if handle.join().is_err() {
                error!("watchdog thread panicked");
            }
        }

        info!(
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            retried = stats.jobs_retried,
            dead_lettered = stats.jobs_dead_lettered,
            "background loops stopped"
        );
        stats
    }
}
