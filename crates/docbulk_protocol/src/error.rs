//! Error types for the wire protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON serialization or parsing failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A bulk NDJSON body could not be decoded.
    #[error("invalid bulk body at line {line}: {message}")]
    InvalidBulkBody {
        /// One-based line number of the offending line.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// Only one half of a concurrency token was supplied.
    #[error("incomplete concurrency token: sequence and epoch must be supplied together")]
    IncompleteToken,

    /// A create or index action was built without a source document.
    #[error("missing source for {0} action")]
    MissingSource(&'static str),

    /// Unknown refresh policy parameter.
    #[error("invalid refresh policy: {0}")]
    InvalidRefreshPolicy(String),

    /// Unparseable time value (e.g. a scroll TTL).
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}

impl ProtocolError {
    /// Creates an invalid bulk body error.
    pub fn invalid_bulk(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidBulkBody {
            line,
            message: message.into(),
        }
    }
}
