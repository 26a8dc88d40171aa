use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use queuey_core::DomainError;
use queuey_infra::jobs::SubmitError;
use queuey_infra::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn validation_error(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Store failures are logged in full and reported generically.
pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    error!(error = %err, "store operation failed");
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "service_unavailable",
        "queue store unavailable",
    )
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::NotFound => not_found("not found"),
        other => validation_error(other.to_string()),
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(e) => domain_error_to_response(e),
        SubmitError::Store(e) => store_error_to_response(e),
    }
}
