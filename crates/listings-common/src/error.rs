//! Error types shared across the listings workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, ListingsError>;

/// Errors raised by shared utilities
#[derive(Error, Debug)]
pub enum ListingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid source location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
