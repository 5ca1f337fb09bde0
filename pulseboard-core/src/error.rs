//! Error types for pulseboard-core

use thiserror::Error;

/// Main error type for the pulseboard-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Start of a requested range lies after its end
    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: String, end: String },

    /// A date string that is not `YYYY-MM-DD`
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// A source document that cannot be turned into a canonical row
    #[error("malformed record in {collection}: {reason}")]
    MalformedRecord { collection: String, reason: String },

    /// A database call ran past its deadline
    #[error("query on {collection} exceeded timeout of {timeout_ms}ms")]
    QueryTimeout { collection: String, timeout_ms: u64 },

    /// Unknown selector value coming from the UI layer
    #[error("unknown {kind} selector: {value}")]
    InvalidSelector { kind: &'static str, value: String },

    /// Two tables of different granularity were combined
    #[error("granularity mismatch: expected {expected}, got {actual}")]
    GranularityMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl Error {
    /// Whether this error should be rendered as an empty chart rather than
    /// propagated to the caller.
    pub fn is_recoverable_store_failure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Json(_))
    }
}

/// Result type alias for pulseboard-core
pub type Result<T> = std::result::Result<T, Error>;
