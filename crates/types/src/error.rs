//! Error types for eventflow-types.

use thiserror::Error;

/// Errors produced while encoding envelopes or parsing endpoints.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Message serialization failed: {0}")]
    SerializationFailed(#[source] serde_json::Error),

    #[error("Message deserialization failed: {0}")]
    DeserializationFailed(#[source] serde_json::Error),

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Result type alias for eventflow-types operations.
pub type Result<T> = std::result::Result<T, Error>;
