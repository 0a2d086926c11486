//! Stored documents.

use crate::error::{StorageError, StorageResult};
use persistdb_codec::Value;

/// Document field holding the object id.
pub const ID_FIELD: &str = "id";
/// Document field holding the class name.
pub const CLASS_FIELD: &str = "$class";
/// Document field holding the first-save timestamp.
pub const CREATED_AT_FIELD: &str = "created_at";
/// Document field holding the latest-save timestamp.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// One stored document.
///
/// The document is always a map whose root carries a text `id` and a text
/// `$class`. Every other root field is an attribute of the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    id: String,
    class: String,
    document: Value,
}

impl Row {
    /// Wraps a document, checking that it has an id and a class.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MalformedRow`] if the document is not a map
    /// or lacks a text `id` or `$class` field.
    pub fn from_document(document: Value) -> StorageResult<Self> {
        let Value::Map(fields) = &document else {
            return Err(StorageError::malformed_row(format!(
                "expected a map, got {}",
                document.kind_name()
            )));
        };
        let id = match fields.get(ID_FIELD) {
            Some(Value::Text(id)) if !id.is_empty() => id.clone(),
            _ => return Err(StorageError::malformed_row("missing text `id` field")),
        };
        let class = match fields.get(CLASS_FIELD) {
            Some(Value::Text(class)) => class.clone(),
            _ => return Err(StorageError::malformed_row("missing text `$class` field")),
        };
        Ok(Self {
            id,
            class,
            document,
        })
    }

    /// The object id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The class name.
    #[must_use]
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The whole document.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Consumes the row, returning the document.
    #[must_use]
    pub fn into_document(self) -> Value {
        self.document
    }
}
