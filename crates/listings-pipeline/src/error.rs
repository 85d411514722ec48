//! Pipeline error taxonomy
//!
//! Every failure inside a pipeline run is a [`PipelineError`]. The
//! orchestrator never propagates these out of a batch: it records
//! [`PipelineError::kind`] and the message on the failed run and moves on.

use listings_common::ListingsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Discovery failed for region '{region}': {message}")]
    Discovery { region: String, message: String },

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Schema error: missing expected columns [{}]", .missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Load error: {0}")]
    Load(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid source location: {0}")]
    InvalidLocation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Common(#[from] ListingsError),

    #[error("Cancelled before start")]
    Cancelled,
}

/// Stable, serializable classification of a [`PipelineError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Retrieval,
    Format,
    Schema,
    NotFound,
    Load,
    Storage,
    Timeout,
    InvalidLocation,
    Io,
    Config,
    Cache,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::Format => "format",
            ErrorKind::Schema => "schema",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Load => "load",
            ErrorKind::Storage => "storage",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidLocation => "invalid_location",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Cache => "cache",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Discovery { .. } => ErrorKind::Discovery,
            PipelineError::Retrieval(_) => ErrorKind::Retrieval,
            PipelineError::Format(_) => ErrorKind::Format,
            PipelineError::Schema { .. } => ErrorKind::Schema,
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::Load(_) => ErrorKind::Load,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::InvalidLocation(_) => ErrorKind::InvalidLocation,
            PipelineError::Io(_) | PipelineError::Common(ListingsError::Io(_)) => ErrorKind::Io,
            PipelineError::Config(_) | PipelineError::Common(ListingsError::Config(_)) => {
                ErrorKind::Config
            }
            PipelineError::Common(ListingsError::InvalidLocation { .. }) => {
                ErrorKind::InvalidLocation
            }
            PipelineError::Cache(_) | PipelineError::Common(ListingsError::Serialization(_)) => {
                ErrorKind::Cache
            }
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Only network-level retrieval failures, transient storage transfers and
    /// timeouts qualify. Format, schema, not-found and load errors are final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Retrieval(_) | PipelineError::Storage(_) | PipelineError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Retrieval(format!("request timed out: {err}"))
        } else {
            PipelineError::Retrieval(err.to_string())
        }
    }
}

impl From<arrow::error::ArrowError> for PipelineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        PipelineError::Format(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for PipelineError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        PipelineError::Format(format!("parquet: {err}"))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Io(std::io::Error::other(err))
    }
}
