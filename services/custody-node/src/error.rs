use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use custody_core::{CustodyError, ErrorKind};
use serde_json::json;
use tracing::error;

/// Error returned by every handler, rendered as `{"kind", "message"}`.
#[derive(Debug)]
pub enum ApiError {
    Custody(CustodyError),
    /// Caller identity headers missing or malformed
    Unauthorized(String),
    /// Blocking worker failed
    Internal(String),
}

impl From<CustodyError> for ApiError {
    fn from(err: CustodyError) -> Self {
        ApiError::Custody(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound | ErrorKind::TokenInvalid => StatusCode::NOT_FOUND,
        ErrorKind::TokenExpired => StatusCode::GONE,
        ErrorKind::InvalidTransition | ErrorKind::ConcurrencyConflict => StatusCode::CONFLICT,
        ErrorKind::StorageError | ErrorKind::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Custody(err) => {
                let kind = err.kind();
                if status_for(kind).is_server_error() {
                    error!(kind = %kind, error = %err, "Request failed");
                }
                (status_for(kind), kind.as_str(), err.to_string())
            }
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, "unauthorized", message),
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        };
        (status, Json(json!({ "kind": kind, "message": message }))).into_response()
    }
}
