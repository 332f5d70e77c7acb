//! Error types for the document store.

use docbulk_protocol::{ErrorCause, ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed or unsupported request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A conditional write did not match the stored version, or a create
    /// hit an existing id.
    #[error("[{id}]: version conflict, {reason}")]
    VersionConflict {
        /// Document id.
        id: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// The document does not exist.
    #[error("[{id}]: document missing")]
    DocumentMissing {
        /// Document id.
        id: String,
    },

    /// The index does not exist.
    #[error("no such index [{0}]")]
    IndexNotFound(String),

    /// The scroll context expired or was never opened.
    #[error("no search context found for id [{0}]")]
    ScrollMissing(String),

    /// No route matches the request.
    #[error("no handler found for uri [{path}] and method [{method}]")]
    NoHandler {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wire protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl StoreError {
    /// Creates a version conflict error.
    pub fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VersionConflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            StoreError::InvalidRequest(_)
            | StoreError::NoHandler { .. }
            | StoreError::Json(_)
            | StoreError::Protocol(_) => 400,
            StoreError::VersionConflict { .. } => 409,
            StoreError::DocumentMissing { .. }
            | StoreError::IndexNotFound(_)
            | StoreError::ScrollMissing(_) => 404,
            StoreError::Internal(_) => 500,
        }
    }

    /// Returns the machine readable error type.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::InvalidRequest(_) => "illegal_argument_exception",
            StoreError::NoHandler { .. } => "no_handler_found_exception",
            StoreError::Json(_) | StoreError::Protocol(_) => "parse_exception",
            StoreError::VersionConflict { .. } => "version_conflict_engine_exception",
            StoreError::DocumentMissing { .. } => "document_missing_exception",
            StoreError::IndexNotFound(_) => "index_not_found_exception",
            StoreError::ScrollMissing(_) => "search_context_missing_exception",
            StoreError::Internal(_) => "internal_server_error",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    /// Returns the error detail attached to failed bulk items.
    pub fn to_cause(&self) -> ErrorCause {
        ErrorCause::new(self.kind(), self.to_string())
    }

    /// Returns the body of an error response.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_cause(),
            status: self.status(),
        }
    }
}
