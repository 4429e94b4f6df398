//! API error handling
//!
//! Domain errors are rendered as `{ "code", "message" }` with a status chosen
//! from the error's [`ErrorKind`]. Defects and backend failures are logged
//! and answered with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use leasehold_types::{ErrorKind, LeaseholdError};

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Missing or invalid identity headers")]
    MissingIdentity,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid request body: {0}")]
    InvalidRequestBody(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    #[error(transparent)]
    Domain(#[from] LeaseholdError),
}

impl ApiError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingIdentity => "UNAUTHENTICATED",
            Self::InvalidParameter(_) => "INVALID_PARAMETER",
            Self::InvalidRequestBody(_) => "INVALID_REQUEST_BODY",
            Self::Domain(err) => err.error_code(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingIdentity => StatusCode::UNAUTHORIZED,
            Self::InvalidParameter(_) | Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::Domain(LeaseholdError::Storage { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Domain(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::StateConflict => StatusCode::CONFLICT,
                ErrorKind::Authorization => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::External => StatusCode::BAD_GATEWAY,
                ErrorKind::Integrity => StatusCode::UNAUTHORIZED,
                ErrorKind::Invariant => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Text shown to the caller
    fn public_message(&self) -> String {
        match self {
            Self::Domain(LeaseholdError::Storage { .. }) => "storage unavailable".to_string(),
            Self::Domain(LeaseholdError::DocumentStore { .. }) => "document store unavailable".to_string(),
            Self::Domain(err) if err.kind() == ErrorKind::Invariant => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.public_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "Request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}
