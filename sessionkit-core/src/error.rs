use thiserror::Error;

use crate::storage::StorageError;

/// Error outputs from `SessionKit`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum SessionKitError {
    /// The target could not be parsed or joined onto the base URL
    #[error("invalid_url: {0}")]
    InvalidUrl(String),
    /// A caller-supplied header name or value is not valid HTTP
    #[error("invalid_header: {0}")]
    InvalidHeader(String),
    /// Network-level failure (connect, DNS, timeout, malformed request)
    #[error("transport_error: {url}: {error}")]
    Transport {
        /// The URL of the failed request.
        url: String,
        /// Description of the failure.
        error: String,
    },
    /// The anti-forgery token could not be established
    #[error("csrf_error: {0}")]
    Csrf(String),
    /// The session refresh call was rejected or failed
    #[error("refresh_failed: status {status:?}")]
    RefreshFailed {
        /// HTTP status of the refresh response, if one was received.
        status: Option<u16>,
    },
    /// The API answered with a non-success status
    #[error("api_error: {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },
    /// Unexpected error serializing or deserializing a payload
    #[error("serialization_error: {0}")]
    Serialization(String),
    /// Durable credential storage failure
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The client configuration is not usable
    #[error("config_error: {0}")]
    Config(String),
}

impl SessionKitError {
    pub(crate) fn transport(url: &reqwest::Url, error: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            error: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for SessionKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
