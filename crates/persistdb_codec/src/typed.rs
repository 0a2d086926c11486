//! Typed access to documents through serde.
//!
//! Application structs that derive `Serialize`/`Deserialize` can be turned
//! into document values and back without hand-written conversions. The
//! conversion routes through ciborium's value model, so the same rules as
//! the canonical encoding apply (no NaN, text map keys).

use crate::cbor::{from_cbor_value, to_cbor};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::Value as Cbor;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Converts any serializable type into a document value.
///
/// # Errors
///
/// Returns [`CodecError::Serde`] if serialization fails, or a codec error
/// if the result contains something documents cannot hold.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    let cbor = Cbor::serialized(value).map_err(|e| CodecError::serde(e.to_string()))?;
    from_cbor_value(cbor)
}

/// Converts a document value into a deserializable type.
///
/// # Errors
///
/// Returns [`CodecError::Serde`] if the document does not match `T`.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    to_cbor(value)?
        .deserialized()
        .map_err(|e| CodecError::serde(e.to_string()))
}
