//! Mapping of handler failures onto JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::executions::StoreError;
use crate::forms::FormError;
use crate::runner::RunnerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Form(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),
            ApiError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                StoreError::Duplicate(_) => (StatusCode::CONFLICT, "CONFLICT", e.to_string()),
                StoreError::ProtectedField(_)
                | StoreError::UnknownField(_)
                | StoreError::InvalidValue { .. } => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                StoreError::Database(_) | StoreError::Pool(_) | StoreError::Serialization(_) => {
                    tracing::error!(error = %e, "Record store error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            ApiError::Runner(e @ RunnerError::InvalidPathSegment(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", e.to_string())
            }
            ApiError::Runner(e) => {
                tracing::warn!(error = %e, "Job runner call failed");
                (StatusCode::BAD_GATEWAY, "RUNNER_ERROR", e.to_string())
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Form(FormError::NoMachines), StatusCode::BAD_REQUEST),
            (ApiError::Store(StoreError::NotFound("1".into())), StatusCode::NOT_FOUND),
            (ApiError::Store(StoreError::Duplicate("1".into())), StatusCode::CONFLICT),
            (ApiError::Store(StoreError::ProtectedField("createdAt".into())), StatusCode::BAD_REQUEST),
            (
                ApiError::Runner(RunnerError::Api { status: 500, body: String::new() }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Runner(RunnerError::InvalidPathSegment("..".into())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let (_, code, message) = ApiError::Internal(anyhow::anyhow!("db password wrong")).classify();
        assert_eq!(code, "INTERNAL_ERROR");
        assert!(!message.contains("password"));
    }
}
