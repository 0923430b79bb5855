//! Error types for the fleet runtime
//!
//! `ApiError` is the single error type returned by HTTP handlers and the
//! subscription dispatcher. It implements `IntoResponse` directly so that
//! every call site can propagate with `?` and still produce the protocol's
//! `{code, message, details?, timestamp}` envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to callers of the core runtime.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    /// Malformed names, SKUs, or payloads.
    #[error("validation error: {0}")]
    Validation(String),

    /// Create-child collision.
    #[error("agent already exists: {0}")]
    AgentExists(String),

    /// Child or SKU missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Wrong HTTP verb for an endpoint.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Unknown API endpoint or subscription upgrade on the wrong transport.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Storage-layer failure, surfaced as 500 with `details`.
    #[error("store error: {0}")]
    Store(String),

    /// Unexpected condition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AgentExists(_) => "AGENT_EXISTS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::UnknownEndpoint(_) => "NOT_FOUND",
            Self::Store(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AgentExists(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render this error as the protocol's JSON error envelope, usable both
    /// for HTTP bodies and for subscription error frames.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code(),
            message: self.to_string(),
            details: match self {
                Self::Store(details) | Self::Internal(details) => Some(details.clone()),
                _ => None,
            },
            timestamp: Utc::now(),
        }
    }
}

/// The wire shape of every protocol error (HTTP body or subscription frame).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Machine-readable error kind.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Optional extra detail (populated for store/internal errors).
    pub details: Option<String>,
    /// When the error was produced.
    pub timestamp: chrono::DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.envelope())).into_response()
    }
}

/// Convenience alias for fallible core operations.
pub type ApiResult<T> = Result<T, ApiError>;
