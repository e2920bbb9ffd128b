use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-facing error taxonomy. Wraps `tutor_core::TutorError` plus the
/// handful of failure modes that only exist at the HTTP boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] tutor_core::TutorError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Pipeline(tutor_core::TutorError::Throttle(
                tutor_core::ThrottleError::QueueFull,
            )) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::Pipeline(tutor_core::TutorError::Throttle(
                tutor_core::ThrottleError::QueueTimeout,
            )) => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            ApiError::Pipeline(tutor_core::TutorError::QueryTimeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            ApiError::Pipeline(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
