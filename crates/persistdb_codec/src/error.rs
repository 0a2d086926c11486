//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or converting documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// NaN has no stable encoding and never equals itself.
    #[error("NaN cannot be stored in documents")]
    NotANumber,

    /// A map key was not a text string.
    #[error("map keys must be text")]
    NonTextKey,

    /// Unsupported CBOR or JSON construct.
    #[error("unsupported type: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported type.
        type_name: String,
    },

    /// Integer does not fit in an i64.
    #[error("integer overflow")]
    IntegerOverflow,

    /// Bytes remained after a complete value was decoded.
    #[error("trailing bytes after document: {count}")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// Key path could not be parsed.
    #[error("invalid key path `{path}`: {reason}")]
    InvalidKeyPath {
        /// The offending path text.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Typed conversion through serde failed.
    #[error("serde conversion failed: {message}")]
    Serde {
        /// Description of the failure.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid key path error.
    pub fn invalid_key_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKeyPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a serde conversion error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }
}
