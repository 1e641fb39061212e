//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping agent and pattern errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use folio_agent::{AgentError, ApprovalError};
use folio_core::error::FolioError;
use folio_patterns::PatternError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 403 Forbidden - the agent or the requested feature is switched off.
    AgentDisabled(String),
    /// 404 Not Found - resource does not exist in the caller's workspace.
    NotFound(String),
    /// 409 Conflict - lifecycle transition not allowed from the current status.
    InvalidTransition(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
}

impl ApiError {
    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::AgentDisabled(msg) => (StatusCode::FORBIDDEN, "agent_disabled", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::InvalidTransition(msg) => {
                (StatusCode::CONFLICT, "invalid_transition", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        }
        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<FolioError> for ApiError {
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::Validation(msg) => ApiError::BadRequest(msg),
            FolioError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Disabled | AgentError::FeatureDisabled(_) => {
                ApiError::AgentDisabled(err.to_string())
            }
            AgentError::Validation(msg) => ApiError::BadRequest(msg),
            AgentError::NotFound(msg) => ApiError::NotFound(msg),
            AgentError::InvalidTransition { .. } => ApiError::InvalidTransition(err.to_string()),
            AgentError::Approval(ApprovalError::InvalidToken) => {
                ApiError::BadRequest(ApprovalError::InvalidToken.to_string())
            }
            AgentError::Approval(ApprovalError::Storage(e)) | AgentError::Storage(e) => e.into(),
        }
    }
}

impl From<PatternError> for ApiError {
    fn from(err: PatternError) -> Self {
        match err {
            PatternError::NotFound(id) => ApiError::NotFound(format!("Detection {} not found", id)),
            PatternError::InvalidTransition { .. } => ApiError::InvalidTransition(err.to_string()),
            PatternError::Storage(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
