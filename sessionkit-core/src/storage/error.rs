//! Error types for durable credential storage.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by durable credential stores.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum StorageError {
    /// The key is empty or contains characters the backend cannot represent.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    /// Filesystem failures from the file-backed store.
    #[error("storage io error: {0}")]
    Io(String),

    /// The stored value is not valid UTF-8.
    #[error("corrupted value for key {key}")]
    Corrupted {
        /// Key whose value could not be decoded.
        key: String,
    },

    /// A lock guarding the in-memory backend was poisoned.
    #[error("storage lock poisoned")]
    Poisoned,
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
