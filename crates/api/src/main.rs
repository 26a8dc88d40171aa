use std::sync::Arc;

use anyhow::Context;

use queuey_api::app::{build_app, AppState};
use queuey_core::HandlerRegistry;
use queuey_infra::jobs::ShutdownSignal;
use queuey_infra::{QueueConfig, StoreBackend};
use queuey_worker::{shutdown_requested, Background};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    queuey_observability::init();

    let config = QueueConfig::from_env().context("invalid api configuration")?;
    let store = queuey_infra::open(config.store, &config.redis_url)
        .with_context(|| format!("failed to open {:?} store", config.store))?;

    // An in-memory store is private to this process, so the process has to
    // run the loops itself.
    let background = if config.store == StoreBackend::Memory {
        tracing::info!("memory store: running embedded workers and watchdog");
        let background = Background::new(ShutdownSignal::new())
            .with_workers(store.clone(), Arc::new(HandlerRegistry::with_builtins()), &config)
            .context("failed to start embedded workers")?
            .with_watchdog(store.clone(), &config)
            .context("failed to start embedded watchdog")?;
        Some(background)
    } else {
        None
    };

    let app = build_app(AppState::new(store, &config));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested())
        .await
        .context("http server failed")?;

    if let Some(background) = background {
        tokio::task::spawn_blocking(move || background.stop())
            .await
            .context("background shutdown task failed")?;
    }
    Ok(())
}
