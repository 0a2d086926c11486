//! Error types for storage operations.

use persistdb_codec::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The journal is corrupted beyond its trailing record.
    #[error("journal corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the journal lock.
    #[error("journal is locked by another process: {path}")]
    Locked {
        /// Path of the locked journal file.
        path: PathBuf,
    },

    /// No index with this name exists.
    #[error("unknown index: {name}")]
    UnknownIndex {
        /// The requested index name.
        name: String,
    },

    /// An index with this name exists with a different definition.
    #[error("index '{name}' already exists with a different definition")]
    IndexConflict {
        /// The conflicting index name.
        name: String,
    },

    /// A write would store a duplicate key in a unique index.
    #[error("unique index '{index}' violated")]
    UniqueViolation {
        /// Name of the violated index.
        index: String,
    },

    /// A document lacks the fields every stored row needs.
    #[error("malformed row: {message}")]
    MalformedRow {
        /// What is wrong with the document.
        message: String,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a malformed row error.
    pub fn malformed_row(message: impl Into<String>) -> Self {
        Self::MalformedRow {
            message: message.into(),
        }
    }
}
