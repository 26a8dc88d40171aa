//! HTTP API application wiring (Axum router + shared state).
//!
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses
//!
//! The store is synchronous, so every handler runs its store work through
//! [`run_blocking`] instead of on the async executor.

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use queuey_infra::jobs::SubmissionService;
use queuey_infra::{QueueConfig, SharedStore, StoreError};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Everything a handler needs, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub submissions: SubmissionService<SharedStore>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(store: SharedStore, config: &QueueConfig) -> Self {
        Self {
            submissions: SubmissionService::new(store.clone(), config.dedupe_window),
            store,
            api_key: Arc::from(config.api_key.as_str()),
        }
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState) -> Router {
    let key_state = middleware::ApiKeyState {
        api_key: state.api_key.clone(),
    };

    // Operator routes: require the API key.
    let operator = routes::operator_router().layer(axum::middleware::from_fn_with_state(
        key_state,
        middleware::require_api_key,
    ));

    Router::new()
        .route("/healthz", get(routes::system::health))
        .merge(routes::router())
        .merge(operator)
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(state))))
}

/// Run a store call on the blocking pool.
pub(crate) async fn run_blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Unavailable(format!("store task failed: {e}")).into()),
    }
}
