//! HTTP error types for the `DataBridge` server.
//!
//! Maps domain errors from `databridge-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use databridge_core::error::{BarrierError, CoreError, DbErrorKind, SealError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The vault is sealed — reject all data-plane operations.
    Sealed,
    /// Authentication or credential resolution failed.
    Unauthorized(String),
    /// Policy denied the operation.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// A conflict (e.g. already initialized, connector id already registered).
    Conflict(String),
    /// Upstream backend unreachable or timed out.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Sealed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "sealed",
                "vault is sealed".to_owned(),
            ),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<SealError> for AppError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::AlreadyInitialized | SealError::AlreadyUnsealed | SealError::AlreadySealed => {
                Self::Conflict(err.to_string())
            }

            SealError::NotInitialized
            | SealError::InvalidConfig { .. }
            | SealError::InvalidShare { .. }
            | SealError::RecoveryFailed { .. }
            | SealError::RootKeyDecryption { .. } => Self::BadRequest(err.to_string()),

            SealError::Crypto(_) | SealError::Barrier(_) | SealError::Storage(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<BarrierError> for AppError {
    fn from(err: BarrierError) -> Self {
        match err {
            BarrierError::Sealed => Self::Sealed,
            BarrierError::Crypto(_) | BarrierError::Storage(_) | BarrierError::KeyVersionUnavailable { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

/// Classify a [`CoreError`] via its closed [`DbErrorKind`] rather than
/// matching every subsystem variant individually — the taxonomy in
/// `databridge-core::error` is exactly the seam the server needs.
impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err.kind() {
            DbErrorKind::ConnectionRefused => Self::Unavailable(message),
            DbErrorKind::AuthenticationFailed => Self::Unauthorized(message),
            DbErrorKind::ConnectionTimeout | DbErrorKind::QueryTimeout => Self::Unavailable(message),
            DbErrorKind::InvalidConfiguration => Self::BadRequest(message),
            DbErrorKind::IntegrityFailure | DbErrorKind::RecoveryFailure | DbErrorKind::Unknown => {
                Self::Internal(message)
            }
        }
    }
}
