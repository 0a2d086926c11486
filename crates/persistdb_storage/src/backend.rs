//! Journal backend trait definition.

use crate::error::StorageResult;

/// Location string that selects a transient, in-memory journal.
pub const MEMORY_LOCATION: &str = ":memory:";

/// An append-only byte journal.
///
/// Backends are opaque byte stores. They know nothing about records,
/// documents or indexes; the store owns the record framing.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_all` returns every byte appended and not truncated
/// - `sync` makes all appended data durable
pub trait JournalBackend: Send + Sync {
    /// Reads the whole journal.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the journal.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Syncs all appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the journal in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the journal to `new_size` bytes.
    ///
    /// Used to cut a torn trailing record before new records are appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` is greater
    /// than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
