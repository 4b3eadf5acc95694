//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping domain errors to a stable error kind and HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use chipwarm_core::error::ChipwarmError;
use chipwarm_session::{SessionError, TransportError};
use chipwarm_simulation::SimulationError;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error kind (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Kinds of 409 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyConnected,
    AlreadyCompleted,
    PairingInProgress,
    SimulationActive,
    Other,
}

impl ConflictKind {
    fn code(self) -> &'static str {
        match self {
            ConflictKind::AlreadyConnected => "already_connected",
            ConflictKind::AlreadyCompleted => "already_completed",
            ConflictKind::PairingInProgress => "pairing_in_progress",
            ConflictKind::SimulationActive => "simulation_active",
            ConflictKind::Other => "conflict",
        }
    }
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 400 - the chip has no live session.
    NotConnected(String),
    /// 401 - missing or unknown bearer token.
    Unauthorized(String),
    /// 403 - the resource belongs to another user.
    Forbidden(String),
    /// 404 - resource does not exist.
    NotFound(String),
    /// 409 - state conflict.
    Conflict(ConflictKind, String),
    /// 429 - rate limit exceeded.
    TooManyRequests,
    /// 500 - unexpected server error. The message is logged, never returned.
    Internal(String),
    /// 500 - the transport rejected an operation.
    TransportFailure(String),
    /// 502 - the session could not resolve its own address.
    IdentityUnavailable(String),
    /// 504 - no handshake progress within the connect timeout.
    Timeout(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::NotConnected(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::TransportFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::IdentityUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotConnected(_) => "not_connected",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(kind, _) => kind.code(),
            ApiError::TooManyRequests => "too_many_requests",
            ApiError::Internal(_) => "internal_error",
            ApiError::TransportFailure(_) => "transport_failure",
            ApiError::IdentityUnavailable(_) => "identity_unavailable",
            ApiError::Timeout(_) => "timeout",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                INTERNAL_MESSAGE.to_string()
            }
            ApiError::TooManyRequests => "Rate limit exceeded".to_string(),
            ApiError::BadRequest(msg)
            | ApiError::NotConnected(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(_, msg)
            | ApiError::TransportFailure(msg)
            | ApiError::IdentityUnavailable(msg)
            | ApiError::Timeout(msg) => msg,
        };

        let body = ErrorBody {
            error: kind.to_string(),
            message,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChipwarmError> for ApiError {
    fn from(err: ChipwarmError) -> Self {
        match err {
            ChipwarmError::Config(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::NotFound(_) => ApiError::NotFound(message),
            SessionError::Forbidden(_) => ApiError::Forbidden(message),
            SessionError::AlreadyConnected(_) => {
                ApiError::Conflict(ConflictKind::AlreadyConnected, message)
            }
            SessionError::PairingInProgress(_) => {
                ApiError::Conflict(ConflictKind::PairingInProgress, message)
            }
            SessionError::Timeout(_) => ApiError::Timeout(message),
            SessionError::Transport(TransportError::IdentityUnavailable(_)) => {
                ApiError::IdentityUnavailable(message)
            }
            SessionError::Transport(_) => ApiError::TransportFailure(message),
            SessionError::Storage(e) => e.into(),
        }
    }
}

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        let message = err.to_string();
        match err {
            SimulationError::NotFound(_) | SimulationError::ChipNotFound(_) => {
                ApiError::NotFound(message)
            }
            SimulationError::Forbidden(_) => ApiError::Forbidden(message),
            SimulationError::NotConnected(_) => ApiError::NotConnected(message),
            SimulationError::SimulationActive(_) => {
                ApiError::Conflict(ConflictKind::SimulationActive, message)
            }
            SimulationError::AlreadyCompleted(_) => {
                ApiError::Conflict(ConflictKind::AlreadyCompleted, message)
            }
            SimulationError::IdentityUnavailable(_) => ApiError::IdentityUnavailable(message),
            SimulationError::InvalidTransition(..) => {
                ApiError::Conflict(ConflictKind::Other, message)
            }
            SimulationError::Storage(e) => e.into(),
        }
    }
}
