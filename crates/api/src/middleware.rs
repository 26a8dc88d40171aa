use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::app::errors;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct ApiKeyState {
    pub api_key: Arc<str>,
}

/// Reject operator requests whose `x-api-key` does not match the configured key.
pub async fn require_api_key(
    State(state): State<ApiKeyState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let authorized = extract_api_key(req.headers()).is_some_and(|key| key == &*state.api_key);
    if authorized {
        return next.run(req).await;
    }

    warn!(path = %req.uri().path(), "rejected operator request: invalid api key");
    errors::json_error(StatusCode::UNAUTHORIZED, "invalid_api_key", "invalid api key")
}

fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}
