// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type covering sync outcomes and HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A supplied access token was rejected by the upstream service.
    /// The caller should refresh via the token store, not retry blindly.
    #[error("Access token rejected by {0}")]
    AuthExpired(&'static str),

    /// Credentials could not be loaded or refreshed at all.
    #[error("Credentials unavailable: {0}")]
    AuthUnavailable(String),

    /// Transient upstream failure (network error, timeout, 429, 5xx).
    /// Safe to retry on a later cycle.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream rejected the request itself (4xx). Retrying the same
    /// payload will not succeed.
    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// A sync record was asked to make a transition its status forbids.
    /// Signals a correctness bug upstream; must surface, not be swallowed.
    #[error("Invalid sync transition: {0}")]
    InvalidTransition(String),

    /// An activity of a kind the mapper does not handle slipped through.
    #[error("Unsupported activity kind: {0}")]
    UnsupportedActivity(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a failed upload is worth retrying on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::UpstreamUnavailable(_))
    }

    /// Whether this is a credential problem that should abort the cycle.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            AppError::AuthExpired(_) | AppError::AuthUnavailable(_)
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::AuthExpired(svc) => (
                StatusCode::UNAUTHORIZED,
                "auth_expired",
                Some((*svc).to_string()),
            ),
            AppError::AuthUnavailable(msg) => (
                StatusCode::UNAUTHORIZED,
                "auth_unavailable",
                Some(msg.clone()),
            ),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::UpstreamUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                "upstream_unavailable",
                Some(msg.clone()),
            ),
            AppError::UpstreamRejected(msg) => (
                StatusCode::BAD_GATEWAY,
                "upstream_rejected",
                Some(msg.clone()),
            ),
            AppError::UnsupportedActivity(kind) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unsupported_activity",
                Some(kind.clone()),
            ),
            AppError::InvalidTransition(msg) => {
                tracing::error!(error = %msg, "Sync ledger invariant violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "invalid_transition",
                    None,
                )
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
