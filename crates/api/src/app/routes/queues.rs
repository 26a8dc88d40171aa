use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Extension, Query},
    response::IntoResponse,
    Json,
};

use queuey_infra::jobs::{queue_metrics, replay_dead_letters};
use queuey_infra::StoreError;

use crate::app::{dto, errors, run_blocking, AppState};

pub async fn metrics(Extension(state): Extension<Arc<AppState>>) -> axum::response::Response {
    let store = state.store.clone();
    match run_blocking::<_, StoreError, _>(move || queue_metrics(&store)).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn replay_dlq(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<dto::ReplayQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return errors::validation_error(rejection.body_text()),
    };

    let store = state.store.clone();
    match run_blocking::<_, StoreError, _>(move || replay_dead_letters(&store, query.limit)).await {
        Ok(requeued) => Json(dto::ReplayResponse { requeued }).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
