use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde_json::{json, Value};
use tracing::warn;

use queuey_infra::{QueueStore, StoreError};

use crate::app::{run_blocking, AppState};

/// Liveness plus a store ping. Always 200 so the process is not restarted
/// for a store outage it cannot fix.
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let store = state.store.clone();
    match run_blocking::<_, StoreError, _>(move || store.ping()).await {
        Ok(()) => Json(json!({ "status": "ok", "store": "up" })),
        Err(e) => {
            warn!(error = %e, "health check: store unreachable");
            Json(json!({ "status": "degraded", "error": e.to_string() }))
        }
    }
}
