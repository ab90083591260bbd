//! Error types for the PULU01 CLI
//!
//! Only setup problems surface as [`CliError`]. Per-record failures never do:
//! they become `Failed` processing results and the run carries on.

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// User-facing error type for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    /// Input file is missing
    #[error("File not found: '{0}'. Verify the file path exists and you have read permissions.")]
    FileNotFound(String),

    /// Explicit CSV header lacks required columns
    #[error("CSV header in '{file}' is missing required column(s): {}. Expected columns: {}.", missing.join(", "), expected.join(", "))]
    Schema {
        file: String,
        missing: Vec<String>,
        expected: Vec<String>,
    },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check pulu.toml, PULU_* environment variables, or command-line flags.")]
    Config(String),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// CSV reader failed outside of per-line handling
    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}. Check the API base URL and TLS settings.")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}. Check the file syntax.")]
    JsonParse(#[from] serde_json::Error),

    /// TOML settings file parsing failed
    #[error("Failed to parse settings file: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a schema error for a header missing required columns
    pub fn schema(file: impl Into<String>, missing: Vec<String>, expected: &[&str]) -> Self {
        Self::Schema {
            file: file.into(),
            missing,
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }
}
