//! Error types for the mergebot

use thiserror::Error;

/// Errors raised by collaborators and infrastructure.
///
/// Inside the branch processor any of these is treated as an unexpected
/// fault: it is caught, logged, and turned into a terminal failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The server answered with an error payload or status
    #[error("API error: {0}")]
    Api(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (carries every problem found)
    #[error("invalid configuration:\n{0}")]
    Config(String),

    /// Branch queue or review store persistence failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Event subscription failure
    #[error("event transport error: {0}")]
    Transport(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
