//! Error types for the HTTP adapters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[source] eventflow_types::Error),

    #[error("Failed to create HTTP request for '{endpoint}': {reason}")]
    RequestConstructionFailed { endpoint: String, reason: String },

    #[error("Failed to make HTTP request: {0}")]
    TransportFailed(#[source] reqwest::Error),

    /// Any status other than 200. The body is kept for diagnostics only.
    #[error("server returned non-OK status code")]
    NonSuccessResponse { status: u16, body: String },

    #[error("HTTP sender is closed")]
    SenderClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP receiver error: {0}")]
    Receiver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
