//! # persistdb Codec
//!
//! Document values and their encodings for persistdb.
//!
//! This crate provides:
//! - [`Value`], the tagged document value every attribute is stored as
//! - [`KeyPath`], dot-separated navigation into nested documents
//! - Canonical CBOR encoding, so identical documents produce identical bytes
//! - JSON and serde bridges for typed access above the engine
//!
//! ## Canonical Rules
//!
//! - Maps have text keys, emitted sorted (encoded length, then bytewise)
//! - Integers and floats use their shortest lossless encoding
//! - No NaN, byte strings or tags
//! - Exactly one item per buffer
//!
//! ## Usage
//!
//! ```
//! use persistdb_codec::{from_cbor, to_canonical_cbor, KeyPath, Value};
//!
//! let doc = Value::map([("b", Value::map([("c", Value::Integer(1))]))]);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! let decoded = from_cbor(&bytes).unwrap();
//!
//! let path = KeyPath::parse("b.c").unwrap();
//! assert_eq!(decoded.lookup(&path), Some(&Value::Integer(1)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;
mod keypath;
mod typed;
mod value;

pub use cbor::{from_cbor, from_cbor_value, to_canonical_cbor};
pub use error::{CodecError, CodecResult};
pub use keypath::{IntoKeyPath, KeyPath, Segment};
pub use typed::{from_value, to_value};
pub use value::Value;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
