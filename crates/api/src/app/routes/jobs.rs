use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    response::IntoResponse,
    Json,
};
use tracing::debug;

use queuey_core::JobId;
use queuey_infra::jobs::find_job;
use queuey_infra::StoreError;

use crate::app::{dto, errors, run_blocking, AppState};

pub async fn submit_job(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Json<dto::SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::validation_error(rejection.body_text()),
    };

    let submissions = state.submissions.clone();
    match run_blocking(move || submissions.submit(body.into_new_job())).await {
        Ok(id) => Json(dto::SubmitJobResponse {
            job_id: id.to_string(),
        })
        .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    // An id that cannot exist is simply not found.
    let Ok(id) = id.parse::<JobId>() else {
        debug!(id = %id, "lookup with unparsable job id");
        return errors::not_found("job not found");
    };

    let store = state.store.clone();
    match run_blocking::<_, StoreError, _>(move || find_job(&store, id)).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => errors::not_found("job not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
