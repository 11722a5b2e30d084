//! Error types for SaveSync core.

use crate::ledger::LedgerError;
use crate::transfer::TransferState;
use crate::types::{GameId, UserId};
use savesync_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while coordinating uploads and downloads.
///
/// `AlreadyLeased`, `InvalidToken`, `HashMismatch` and `NotFound` are routine
/// outcomes reported back to the client. `IoFailure` and `Ledger` are local
/// faults and are logged.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The game does not exist or does not belong to the caller.
    #[error("game not found: {game_id}")]
    NotFound {
        /// The requested game.
        game_id: GameId,
    },

    /// The caller may not access the game.
    #[error("{user_id} may not access {game_id}")]
    Forbidden {
        /// The caller.
        user_id: UserId,
        /// The requested game.
        game_id: GameId,
    },

    /// Another client holds the lease for the game.
    #[error("{game_id} is already leased")]
    AlreadyLeased {
        /// The contended game.
        game_id: GameId,
    },

    /// The lease token is missing, unknown or expired.
    #[error("invalid or expired lease token")]
    InvalidToken,

    /// The uploaded bytes do not match the declared hash.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        /// Hash declared by the client.
        declared: String,
        /// Hash computed over the staged file.
        computed: String,
    },

    /// The request is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// A local file-system operation failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[source] StorageError),

    /// The revision ledger failed.
    #[error("ledger error: {message}")]
    Ledger {
        /// Description of the ledger failure.
        message: String,
    },

    /// An upload attempted an impossible state change.
    #[error("invalid transfer transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State before the transition.
        from: TransferState,
        /// Requested state.
        to: TransferState,
    },
}

impl CoreError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Maps a ledger lookup failure for `game_id` requested by `user_id`.
    pub fn from_ledger(err: LedgerError, user_id: UserId, game_id: GameId) -> Self {
        match err {
            LedgerError::NotFound { .. } => Self::NotFound { game_id },
            LedgerError::Forbidden { .. } => Self::Forbidden { user_id, game_id },
            LedgerError::Backend(message) => Self::Ledger { message },
        }
    }

    /// Returns true if the request lost a race for a lease and may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::AlreadyLeased { .. })
    }

    /// Returns true if this is a routine outcome caused by the client.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound { .. }
                | CoreError::Forbidden { .. }
                | CoreError::AlreadyLeased { .. }
                | CoreError::InvalidToken
                | CoreError::HashMismatch { .. }
                | CoreError::InvalidRequest { .. }
        )
    }

    /// Returns true if this is a local fault.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::HashMismatch { declared, computed } => {
                CoreError::HashMismatch { declared, computed }
            }
            StorageError::MissingHash => CoreError::invalid_request("declared hash is empty"),
            StorageError::InvalidKey(key) => {
                CoreError::invalid_request(format!("invalid storage key: {key:?}"))
            }
            other => CoreError::IoFailure(other),
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::IoFailure(StorageError::Io(err))
    }
}
