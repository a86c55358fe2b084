use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use query_engine::QueryError;
use serde_json::json;
use thiserror::Error;

/// Central error type for the Gateway application
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            AppError::Query(err) => match err {
                QueryError::InvalidRange { .. } | QueryError::InvalidRequest(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string(), "INVALID_QUERY")
                }
                QueryError::FineRangeTooLarge { .. } => {
                    (StatusCode::BAD_REQUEST, err.to_string(), "RANGE_TOO_LARGE")
                }
                QueryError::UnknownSource(_) => {
                    (StatusCode::NOT_FOUND, err.to_string(), "UNKNOWN_SOURCE")
                }
                QueryError::Store { .. } | QueryError::Aborted(_) => {
                    tracing::error!(error = %err, "Query failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Query failed".to_string(),
                        "QUERY_FAILED",
                    )
                }
            },
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": error_message
        }));

        (status, body).into_response()
    }
}
