//! Error types for persistdb core.

use persistdb_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in persistdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A save would violate a unique index. Nothing was written.
    #[error("uniqueness violated for index '{index}'")]
    Uniqueness {
        /// Name of the violated index.
        index: String,
    },

    /// An invalid class or index declaration.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the declaration.
        message: String,
    },

    /// A query that cannot be executed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Why the query is invalid.
        message: String,
    },

    /// An attribute that cannot be persisted.
    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A stored document that does not describe an object.
    #[error("malformed document for object {id}: {message}")]
    MalformedDocument {
        /// Id of the stored row.
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// Backing store error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Document codec error.
    #[error("codec error: {0}")]
    Codec(#[from] persistdb_codec::CodecError),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation { index } => Self::Uniqueness { index },
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an invalid attribute error.
    pub fn invalid_attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a malformed document error.
    pub fn malformed_document(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Returns true for a uniqueness violation.
    #[must_use]
    pub fn is_uniqueness(&self) -> bool {
        matches!(self, Self::Uniqueness { .. })
    }
}
