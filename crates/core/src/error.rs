//! Error taxonomy shared by every custody crate.
//!
//! Each variant carries a stable machine-readable [`ErrorKind`] so transports
//! can report failures without parsing display strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad create payload or rejected input
    ValidationError,
    /// Unknown handoff id
    NotFound,
    /// Token does not match any handoff
    TokenInvalid,
    /// Token matched a handoff that is past its confirmation window
    TokenExpired,
    /// State machine guard failed
    InvalidTransition,
    /// Optimistic precondition lost a race
    ConcurrencyConflict,
    /// Backing store failure
    StorageError,
    /// Configuration could not be loaded
    ConfigError,
}

impl ErrorKind {
    /// Wire code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TokenInvalid => "token_invalid",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::ConcurrencyConflict => "concurrency_conflict",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::ConfigError => "config_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for custody operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// Create payload or command input failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Handoff not found
    #[error("Handoff not found: {id}")]
    NotFound {
        /// Requested identifier
        id: String,
    },

    /// Confirmation token unknown
    #[error("Confirmation token is invalid")]
    TokenInvalid,

    /// Confirmation token no longer usable
    #[error("Confirmation token expired for handoff {handoff_id}")]
    TokenExpired {
        /// Handoff the token belonged to
        handoff_id: String,
    },

    /// Guard rejected the requested transition
    #[error("Invalid transition: cannot {event} from {from}")]
    InvalidTransition {
        /// Status at the time of the attempt
        from: String,
        /// Event that was attempted
        event: String,
    },

    /// Stored version moved while the transition was computed
    #[error("Concurrency conflict on handoff {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Handoff identifier
        id: String,
        /// Version the caller read
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CustodyError {
    /// Machine-readable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::Validation(_) => ErrorKind::ValidationError,
            CustodyError::NotFound { .. } => ErrorKind::NotFound,
            CustodyError::TokenInvalid => ErrorKind::TokenInvalid,
            CustodyError::TokenExpired { .. } => ErrorKind::TokenExpired,
            CustodyError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CustodyError::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            CustodyError::Storage(_) => ErrorKind::StorageError,
            CustodyError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Shorthand for a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        CustodyError::NotFound { id: id.into() }
    }

    /// Shorthand for an `InvalidTransition` error.
    pub fn invalid_transition(from: impl ToString, event: impl ToString) -> Self {
        CustodyError::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(err: serde_json::Error) -> Self {
        CustodyError::Storage(format!("serialization: {}", err))
    }
}

/// Result type for custody operations.
pub type Result<T> = std::result::Result<T, CustodyError>;
