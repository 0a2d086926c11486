//! # persistdb Testkit
//!
//! Test utilities for persistdb.
//!
//! This crate provides:
//! - Test fixtures, database helpers and declared test classes
//! - Property-based test generators using proptest
//! - A harness checking that reloads restore what was saved
//! - Concurrent save helpers for uniqueness under contention
//!
//! The cross-crate integration tests live in `tests/`.
//!
//! ## Usage
//!
//! ```rust
//! use persistdb_core::ObjectRef;
//! use persistdb_testkit::prelude::*;
//!
//! let db = TestDatabase::memory();
//! let b = ObjectRef::new("B");
//! b.set("ref0", ObjectRef::new("A"));
//! db.save(&b).unwrap();
//! assert_eq!(db.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
