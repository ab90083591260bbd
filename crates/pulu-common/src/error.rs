//! Error types shared across PULU crates

use thiserror::Error;

/// Result type alias for shared PULU operations
pub type Result<T> = std::result::Result<T, PuluError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum PuluError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{0}': expected yyyy-MM-ddTHH:mm:ss.fff")]
    InvalidTimestamp(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
