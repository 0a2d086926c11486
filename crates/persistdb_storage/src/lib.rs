//! # persistdb Storage
//!
//! The backing document store for persistdb.
//!
//! Documents are kept in memory and made durable through an append-only
//! journal: every committed write transaction becomes one checksummed
//! record, replayed when the store is opened again.
//!
//! ## Components
//!
//! - [`JournalBackend`]: opaque append-only byte journal, with
//!   [`MemoryJournal`] for `":memory:"` and [`FileJournal`] for files
//! - [`DocumentStore`]: rows, selections and index declarations
//! - [`WriteTransaction`]: exclusive unit of work with check-then-write
//!   atomicity
//! - [`Predicate`]: SQL-like conditions over key paths
//! - [`HashIndex`]: equality indexes, optionally unique, scoped to a class
//!   or global
//!
//! ## Example
//!
//! ```rust
//! use persistdb_codec::{KeyPath, Value};
//! use persistdb_storage::{DocumentStore, Row, StoreOptions};
//!
//! let store = DocumentStore::open(":memory:", StoreOptions::default()).unwrap();
//!
//! let mut tx = store.begin_write();
//! tx.upsert(Row::from_document(Value::map([
//!     ("id", Value::from("x1")),
//!     ("$class", Value::from("Note")),
//! ])).unwrap()).unwrap();
//! tx.commit().unwrap();
//!
//! assert!(store.fetch("x1").is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod index;
mod journal;
mod memory;
mod predicate;
mod row;
mod stats;
mod store;

pub use backend::{JournalBackend, MEMORY_LOCATION};
pub use error::{StorageError, StorageResult};
pub use file::FileJournal;
pub use index::{HashIndex, IndexDefinition, IndexScope};
pub use journal::{compute_crc32, encode_record, replay, JournalEntry, Replay};
pub use memory::MemoryJournal;
pub use predicate::{class_path, CompareOp, LikeKind, Predicate, Transform};
pub use row::{Row, CLASS_FIELD, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use stats::{StoreStats, StoreStatsSnapshot};
pub use store::{DocumentStore, Selection, SortKey, StoreOptions, WriteTransaction};
