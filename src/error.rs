//! Error types for Janus
//!
//! This module defines custom error types used throughout the application.

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing api-key header")]
    MissingApiKey,

    #[error("Operation {0} not found")]
    UnknownOperation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamConnect(String),

    /// Non-success upstream status received before any stream began.
    /// Relayed to the client verbatim, body and status untouched.
    #[error("Upstream returned status {status}")]
    UpstreamStatus {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            // Verbatim relay short-circuits the JSON error shape: the
            // client sees exactly what the provider sent
            AppError::UpstreamStatus {
                status,
                content_type,
                body,
            } => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let mut builder = Response::builder().status(status);
                if let Some(ct) = content_type {
                    builder = builder.header(header::CONTENT_TYPE, ct);
                }
                return builder
                    .body(Body::from(body))
                    .unwrap_or_else(|_| status.into_response());
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::MissingApiKey => (
                StatusCode::UNAUTHORIZED,
                "MISSING_API_KEY",
                "Missing api-key header".to_string(),
            ),
            AppError::UnknownOperation(op) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_OPERATION",
                format!("Operation {op} not found"),
            ),
            AppError::UpstreamConnect(msg) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE", msg)
            }
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                "Invalid JSON in request".to_string(),
            ),
            AppError::Http(_) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_UNAVAILABLE",
                "Upstream connection failed".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AppError::BadRequest("bad path".into()).into_response(),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::MissingApiKey.into_response(),
                StatusCode::UNAUTHORIZED,
            ),
            (
                AppError::UnknownOperation("Frobnicate".into()).into_response(),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::UpstreamConnect("dns failure".into()).into_response(),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (response, expected) in cases {
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_upstream_status_relayed_verbatim() {
        let response = AppError::UpstreamStatus {
            status: 429,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(b"{\"error\":\"throttled\"}"),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
