use std::{sync::Arc, time::Duration};

/// Represents a result type for fallible operations in this crate.
///
/// Only the transport layer produces errors. Evaluation (bucketing, conditions, resolution)
/// always returns a value and falls back to defaults instead.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors of the decision client.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// Server responded with a non-success status code.
    #[error("server responded with status {0}")]
    Status(u16),

    /// Request did not complete within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Response body could not be decoded into the expected shape.
    #[error("invalid response body")]
    InvalidResponse(#[source] Arc<serde_json::Error>),

    /// Request body could not be encoded.
    #[error("unable to serialize request body")]
    Serialization(#[source] Arc<serde_json::Error>),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
