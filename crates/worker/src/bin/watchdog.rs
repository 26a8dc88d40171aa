use anyhow::Context;

use queuey_infra::jobs::ShutdownSignal;
use queuey_infra::QueueConfig;
use queuey_worker::{shutdown_requested, Background};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    queuey_observability::init();

    let config = QueueConfig::from_env().context("invalid watchdog configuration")?;
    let store = queuey_infra::open(config.store, &config.redis_url)
        .with_context(|| format!("failed to open {:?} store", config.store))?;

    let background = Background::new(ShutdownSignal::new())
        .with_watchdog(store, &config)
        .context("failed to start watchdog thread")?;

    shutdown_requested().await;

    tokio::task::spawn_blocking(move || background.stop())
        .await
        .context("watchdog shutdown task failed")?;
    Ok(())
}
