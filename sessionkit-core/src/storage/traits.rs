//! Platform interface for durable session storage.

use super::error::StorageResult;

/// Durable key/value store backing the session credential.
///
/// Hosts provide this to keep the credential across restarts, e.g. browser
/// local storage, a keychain, or a file in the user's config directory.
/// Values written here must survive the process; nothing else is assumed.
pub trait CredentialStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn read(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes the value stored under `key`. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&self, key: &str) -> StorageResult<()>;
}
