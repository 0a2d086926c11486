//! In-memory journal for transient stores.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;

/// An in-memory journal.
///
/// Backs the `":memory:"` location. Everything is lost when the store is
/// dropped. Useful for tests and for caches that do not need persistence.
///
/// # Example
///
/// ```rust
/// use persistdb_storage::{JournalBackend, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// let offset = journal.append(b"record").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(journal.size().unwrap(), 6);
/// ```
#[derive(Debug, Default)]
pub struct MemoryJournal {
    data: RwLock<Vec<u8>>,
}

impl MemoryJournal {
    /// Creates a new empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal with pre-existing contents.
    ///
    /// Useful for replay and torn-write tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data.read().clone())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut buffer = self.data.write();
        let offset = buffer.len() as u64;
        buffer.extend_from_slice(data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut buffer = self.data.write();
        let current = buffer.len() as u64;
        if new_size > current {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot truncate to {new_size}, journal holds {current} bytes"),
            )));
        }
        buffer.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut journal = MemoryJournal::new();
        assert_eq!(journal.append(b"hello").unwrap(), 0);
        assert_eq!(journal.append(b" world").unwrap(), 5);
        assert_eq!(journal.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn truncate_cuts_tail() {
        let mut journal = MemoryJournal::with_data(b"abcdef".to_vec());
        journal.truncate(3).unwrap();
        assert_eq!(journal.read_all().unwrap(), b"abc");
        assert!(journal.truncate(10).is_err());
    }
}
