use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod queues;
pub mod system;

/// Public routes: submission and inspection.
pub fn router() -> Router {
    Router::new()
        .route("/v1/jobs", post(jobs::submit_job))
        .route("/v1/jobs/:id", get(jobs::get_job))
        .route("/v1/queues/metrics", get(queues::metrics))
}

/// Routes that require the operator API key.
pub fn operator_router() -> Router {
    Router::new().route("/v1/replay-dlq", post(queues::replay_dlq))
}
