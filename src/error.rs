// src/error.rs
// Error taxonomy shared by the HTTP layer and the services

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// The primary error type crossing service boundaries.
///
/// Variants map one-to-one onto the HTTP statuses the API surfaces; internal
/// plumbing uses `anyhow` and converts at the edge.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or invalid input.
    #[error("{0}")]
    Validation(String),

    /// Startup incomplete.
    #[error("service is still starting")]
    NotReady,

    /// Target message or entity absent.
    #[error("{0}")]
    NotFound(String),

    /// Semantic precondition violated (e.g. replying to your own message).
    #[error("{0}")]
    Forbidden(String),

    /// Every provider in the chain was denied by the rate limiter.
    #[error("all providers rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Every provider in the chain failed for non-rate reasons.
    #[error("provider failure: {0}")]
    Provider(String),

    /// Vector or cache store unreachable on a surfaced path.
    #[error("store failure: {0}")]
    Store(String),

    /// Anything unexpected.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Provider(_) | AppError::Store(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed: {:#}", self);
        }
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotReady.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::RateLimited { retry_after: 12 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Provider("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
