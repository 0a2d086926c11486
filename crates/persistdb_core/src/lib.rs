//! # persistdb Core
//!
//! Persistent objects on top of the persistdb document store.
//!
//! This crate provides:
//! - [`ObjectRef`]: shared handles to objects with a globally unique id,
//!   a class and a bag of attributes
//! - Class declarations ([`ClassDef`], [`Persistent`]) naming the
//!   attributes stored by id rather than embedded
//! - [`Database`]: the owned context for save, load, delete and
//!   transactions, with an [`LruCache`] of loaded objects
//! - Unique and non-unique indexes ([`IndexSpec`]) validated atomically
//!   with each save
//! - A key-path query engine ([`Query`], [`OrQuery`])
//!
//! ## Example
//!
//! ```rust
//! use persistdb_core::{Database, ObjectRef, Query};
//!
//! let db = Database::open_in_memory().unwrap();
//!
//! let note = ObjectRef::new("Note");
//! note.set("title", "groceries").set("tags", vec!["home", "errands"]);
//! db.save(&note).unwrap();
//!
//! let found = Query::new("Note")
//!     .greater_than("tags", 1, true)
//!     .find(&db)
//!     .unwrap();
//! assert_eq!(found.len(), 1);
//! assert!(found[0].created_at().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod class;
mod config;
mod database;
mod error;
mod index;
mod object;
mod query;
mod resolver;
mod stats;

pub use cache::{CacheStats, LruCache};
pub use class::{is_reserved_attribute, ClassDef, ClassRegistry, Persistent};
pub use config::{Config, DEFAULT_CACHE_SIZE};
pub use database::{Database, Transaction};
pub use error::{CoreError, CoreResult};
pub use index::{index_name, IndexDescriptor, IndexRegistry, IndexSpec};
pub use object::{
    timestamp_from_value, timestamp_to_value, Attr, ObjectId, ObjectRef, ObjectState,
    WeakObjectRef,
};
pub use query::{Filter, Operator, OrQuery, Query, SortSpec};
pub use stats::DatabaseStats;

pub use persistdb_codec::{KeyPath, Value};
pub use persistdb_storage::IndexScope;
