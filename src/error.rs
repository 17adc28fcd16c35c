// src/error.rs

//! Error types for the marketplace engine

use thiserror::Error;

/// Marketplace errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Signature error: {0}")]
    SignatureError(String),

    #[error("Security scanner unavailable: {0}")]
    ScannerUnavailable(String),

    #[error("Resource handler error: {0}")]
    HandlerError(String),

    #[error("Operation timed out: {0}")]
    TimeoutError(String),

    #[error("Invalid deployment state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ParseError(err.to_string())
    }
}

/// Result type alias for marketplace operations
pub type Result<T> = std::result::Result<T, Error>;
