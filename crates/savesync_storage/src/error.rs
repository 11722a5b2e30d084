//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The staged bytes do not match the hash declared by the uploader.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch {
        /// The hash declared by the client.
        declared: String,
        /// The hash computed over the staged file.
        computed: String,
    },

    /// The uploader did not declare a hash.
    #[error("declared hash is empty")]
    MissingHash,

    /// A storage key would escape its namespace or is otherwise unusable.
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    /// A storage root is missing and may not be created.
    #[error("storage root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    /// Another process already owns the storage roots.
    #[error("storage locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    /// Returns true if the error was caused by the uploaded content rather
    /// than by the local file system.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            StorageError::HashMismatch { .. } | StorageError::MissingHash
        )
    }
}
