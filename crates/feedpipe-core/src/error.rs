//! Errors produced by the core pipeline logic.

use thiserror::Error;

/// Errors from request validation, decompression and filtering.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request builder rejected its inputs.
    #[error("Invalid feed request: {0}")]
    InvalidRequest(String),

    /// Input is not a gzip archive (bad magic bytes or missing `.gz`).
    #[error("Not a gzip feed file: {0}")]
    NotGzip(String),

    /// Filtering was requested without any identifiers.
    #[error("Filter criteria are empty")]
    EmptyCriteria,

    /// The feed has no header line.
    #[error("Feed file is empty")]
    EmptyFeed,

    /// A criterion refers to a column the header does not contain.
    #[error("Feed header has no '{0}' column")]
    MissingColumn(String),

    /// Underlying read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;
