//! Error types for the client.

use docbulk_protocol::{ErrorResponse, FailureCategory, ProtocolError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to a document store.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The supplied concurrency token no longer matches the stored version.
    #[error("version conflict on document {id}: {message}")]
    Conflict {
        /// Document id.
        id: String,
        /// Store-provided detail.
        message: String,
    },

    /// The document (or index) does not exist.
    #[error("document not found: {id}")]
    NotFound {
        /// Document id, or the index name for index-level misses.
        id: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The store rejected the request.
    #[error("server error {status}: {reason}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Store-provided reason.
        reason: String,
    },

    /// Malformed or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Document encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The bulk session no longer accepts items.
    #[error("bulk session is closed")]
    SessionClosed,

    /// An update kept conflicting until its attempt budget ran out.
    #[error("update of {id} failed after {attempts} attempts")]
    UpdateExhausted {
        /// Document id.
        id: String,
        /// Number of conditional writes performed.
        attempts: u32,
    },

    /// A concurrency token was incomplete or unusable.
    #[error("invalid concurrency token: {0}")]
    InvalidToken(String),

    /// Explicit refresh was requested on a repository that forbids it.
    #[error("refresh is not allowed on this repository")]
    RefreshNotAllowed,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Builds an error from a non-2xx status and its (ES style) body.
    ///
    /// `id` names the document the request targeted, if any.
    pub fn from_response(status: u16, body: &[u8], id: Option<&str>) -> Self {
        let reason = match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(response) => format!("{}: {}", response.error.kind, response.error.reason),
            Err(_) => String::from_utf8_lossy(body).into_owned(),
        };
        match FailureCategory::from_status(status) {
            FailureCategory::Conflict => ClientError::Conflict {
                id: id.unwrap_or_default().to_string(),
                message: reason,
            },
            FailureCategory::NotFound => ClientError::NotFound {
                id: id.map(str::to_string).unwrap_or(reason),
            },
            FailureCategory::Other => ClientError::Server { status, reason },
        }
    }

    /// Returns the failure category used for routing.
    pub fn category(&self) -> FailureCategory {
        match self {
            ClientError::Conflict { .. } | ClientError::UpdateExhausted { .. } => {
                FailureCategory::Conflict
            }
            ClientError::NotFound { .. } => FailureCategory::NotFound,
            ClientError::Server { status, .. } => FailureCategory::from_status(*status),
            _ => FailureCategory::Other,
        }
    }

    /// Returns true if this error is a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }

    /// Returns true if the request itself can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::IncompleteToken => ClientError::InvalidToken(err.to_string()),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection reset").is_retryable());
        assert!(!ClientError::transport_fatal("bad url").is_retryable());
        assert!(ClientError::Server {
            status: 503,
            reason: "unavailable".into()
        }
        .is_retryable());
        assert!(!ClientError::Server {
            status: 400,
            reason: "bad request".into()
        }
        .is_retryable());
        assert!(!ClientError::SessionClosed.is_retryable());
    }

    #[test]
    fn from_response_maps_statuses() {
        let body = br#"{"error":{"type":"version_conflict_engine_exception","reason":"current seq 6"},"status":409}"#;
        let err = ClientError::from_response(409, body, Some("doc-1"));
        assert!(err.is_conflict());
        assert!(err.to_string().contains("doc-1"));
        assert!(err.to_string().contains("current seq 6"));

        let err = ClientError::from_response(404, b"{}", Some("gone"));
        assert!(matches!(err, ClientError::NotFound { ref id } if id == "gone"));

        let err = ClientError::from_response(500, b"boom", None);
        assert!(matches!(err, ClientError::Server { status: 500, ref reason } if reason == "boom"));
    }

    #[test]
    fn categories() {
        assert_eq!(
            ClientError::UpdateExhausted {
                id: "x".into(),
                attempts: 2
            }
            .category(),
            FailureCategory::Conflict
        );
        assert_eq!(
            ClientError::NotFound { id: "x".into() }.category(),
            FailureCategory::NotFound
        );
        assert_eq!(
            ClientError::Codec("bad".into()).category(),
            FailureCategory::Other
        );
    }

    #[test]
    fn error_display() {
        let err = ClientError::UpdateExhausted {
            id: "doc-7".into(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "update of doc-7 failed after 3 attempts");

        let err: ClientError = ProtocolError::IncompleteToken.into();
        assert!(matches!(err, ClientError::InvalidToken(_)));
    }
}
