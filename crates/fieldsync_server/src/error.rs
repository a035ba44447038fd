//! Error types for the sync server.

use fieldsync_core::CoreError;
use fieldsync_protocol::{ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A batch carried more deltas than the server accepts.
    #[error("too many deltas: {count} > {limit}")]
    BatchTooLarge {
        /// Deltas in the request.
        count: usize,
        /// Configured maximum.
        limit: u32,
    },

    /// A response-only message arrived as a request.
    #[error("unexpected message type: {0}")]
    UnexpectedMessage(u8),

    /// The request could not be decoded, or the reply encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The engine rejected or failed the operation.
    #[error(transparent)]
    Engine(#[from] CoreError),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::BatchTooLarge { .. }
            | ServerError::UnexpectedMessage(_)
            | ServerError::Protocol(ProtocolError::Decode(_))
            | ServerError::Protocol(ProtocolError::UnknownVariant { .. }) => true,
            ServerError::Protocol(ProtocolError::Encode(_)) => false,
            ServerError::Engine(e) => e.is_not_found() || e.is_rule_violation(),
        }
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns true if the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Engine(e) if e.is_retryable())
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::UnexpectedMessage(_) => "invalid_request",
            ServerError::BatchTooLarge { .. } => "batch_too_large",
            ServerError::Protocol(_) => "protocol",
            ServerError::Engine(CoreError::Rule(_)) => "rule_violation",
            ServerError::Engine(CoreError::BatchNotFound(_) | CoreError::ConflictNotFound(_)) => {
                "not_found"
            }
            ServerError::Engine(CoreError::Cancelled) => "cancelled",
            ServerError::Engine(CoreError::Storage(_)) => "storage",
            ServerError::Engine(_) => "internal",
        }
    }

    /// Boundary form of the error.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}
