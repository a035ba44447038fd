//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or parsing protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A value could not be encoded to CBOR.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be decoded from CBOR.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A textual name did not match any known variant.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// Which enumeration was being parsed.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

impl ProtocolError {
    pub(crate) fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
