//! Error types for the sync engine.

use crate::rules::RuleViolation;
use thiserror::Error;
use uuid::Uuid;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
///
/// Staleness is never an error: a stale delta becomes a conflict record in
/// the batch outcome.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error. The unit of work was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] fieldsync_protocol::ProtocolError),

    /// The journal holds bytes that are not a valid record.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A precondition did not hold; nothing was mutated.
    #[error("rule violation: {0}")]
    Rule(#[from] RuleViolation),

    /// No batch with this id.
    #[error("batch not found: {0}")]
    BatchNotFound(Uuid),

    /// No conflict with this id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(Uuid),

    /// The caller cancelled before the unit of work committed.
    #[error("operation cancelled before commit")]
    Cancelled,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the same call may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Storage(e) => e.is_transient(),
            CoreError::Cancelled => true,
            _ => false,
        }
    }

    /// Returns true for unknown batch or conflict ids.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::BatchNotFound(_) | CoreError::ConflictNotFound(_)
        )
    }

    /// Returns true for precondition violations.
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, CoreError::Rule(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::StorageError;

    #[test]
    fn classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(CoreError::Storage(StorageError::Io(io)).is_retryable());
        assert!(CoreError::Cancelled.is_retryable());
        assert!(!CoreError::Rule(RuleViolation::EmptyBatch).is_retryable());
        assert!(CoreError::Rule(RuleViolation::EmptyBatch).is_rule_violation());
        assert!(CoreError::BatchNotFound(Uuid::nil()).is_not_found());
        assert!(!CoreError::Cancelled.is_not_found());
    }

    #[test]
    fn corruption_display() {
        let err = CoreError::journal_corruption(42, "crc mismatch");
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("crc mismatch"));
    }
}
