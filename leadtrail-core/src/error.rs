//! Error types for leadtrail-core

use thiserror::Error;

/// Main error type for the leadtrail-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (fatal to engine initialization)
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable or ephemeral storage is unavailable
    #[error("storage error: {0}")]
    Storage(String),

    /// Event batch could not be handed to any transport
    #[error("delivery error: {0}")]
    Delivery(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Page URL could not be parsed
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Host referenced a node the page mirror does not know
    #[error("unknown node: {0}")]
    UnknownNode(u64),

    /// Selector could not be parsed
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },

    /// The engine task is gone or its channel is full
    #[error("engine runtime: {0}")]
    Runtime(String),
}

/// Result type alias for leadtrail-core
pub type Result<T> = std::result::Result<T, Error>;
