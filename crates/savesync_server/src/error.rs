//! Error types for the save server.

use savesync_core::{CoreError, LedgerError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by request handlers.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request or missing header.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or bad credential, or an unknown or lapsed upload key.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown game or save.
    #[error("not found: {0}")]
    NotFound(String),

    /// The game is leased by another request.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Uploaded bytes don't match the declared hash.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        /// Hash sent by the client.
        declared: String,
        /// Hash of the received bytes.
        computed: String,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::Conflict(_) => 409,
            ServerError::HashMismatch { .. } => 422,
            ServerError::Internal(_) | ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_) | ServerError::Io(_))
    }
}

impl From<CoreError> for ServerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => ServerError::NotFound(err.to_string()),
            CoreError::Forbidden { .. } => ServerError::Forbidden(err.to_string()),
            CoreError::AlreadyLeased { .. } => ServerError::Conflict(err.to_string()),
            CoreError::InvalidToken => ServerError::Unauthorized(err.to_string()),
            CoreError::HashMismatch { declared, computed } => {
                ServerError::HashMismatch { declared, computed }
            }
            CoreError::InvalidRequest { message } => ServerError::InvalidRequest(message),
            CoreError::IoFailure(_)
            | CoreError::Ledger { .. }
            | CoreError::InvalidTransition { .. } => ServerError::Internal(err.to_string()),
        }
    }
}

impl From<LedgerError> for ServerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { .. } => ServerError::NotFound(err.to_string()),
            LedgerError::Forbidden { .. } => ServerError::Forbidden(err.to_string()),
            LedgerError::Backend(_) => ServerError::Internal(err.to_string()),
        }
    }
}
