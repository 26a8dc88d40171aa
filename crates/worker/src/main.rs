use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use queuey_core::HandlerRegistry;
use queuey_infra::jobs::ShutdownSignal;
use queuey_infra::QueueConfig;
use queuey_worker::{shutdown_requested, Background};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    queuey_observability::init();

    let config = QueueConfig::from_env().context("invalid worker configuration")?;
    let store = queuey_infra::open(config.store, &config.redis_url)
        .with_context(|| format!("failed to open {:?} store", config.store))?;

    let registry = Arc::new(HandlerRegistry::with_builtins());
    info!(job_types = ?registry.job_types(), "registered handlers");

    let background = Background::new(ShutdownSignal::new())
        .with_workers(store, registry, &config)
        .context("failed to start worker threads")?;

    shutdown_requested().await;

    tokio::task::spawn_blocking(move || background.stop())
        .await
        .context("worker shutdown task failed")?;
    Ok(())
}
