//! Canonical CBOR encoding of documents.
//!
//! Encoding goes through [`ciborium`]'s value model. Canonical form is
//! enforced on the way in: map keys are emitted sorted by encoded length,
//! then bytewise, and integers and floats use ciborium's shortest lossless
//! encoding. Decoding accepts only the subset of CBOR that [`Value`] can
//! represent.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};
use std::collections::BTreeMap;

/// Encode a document value to canonical CBOR bytes.
///
/// Identical values always produce identical bytes, which is what the
/// storage layer relies on for index keys.
///
/// # Errors
///
/// Returns [`CodecError::NotANumber`] if the value holds a NaN, or
/// [`CodecError::EncodingFailed`] if the underlying writer fails.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let cbor = to_cbor(value)?;
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(&cbor, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode a document value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR, contain constructs
/// that documents cannot hold (NaN, tags, byte strings, non-text map
/// keys), or have bytes left over after the first value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut reader = bytes;
    let cbor: Cbor = ciborium::de::from_reader(&mut reader)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    if !reader.is_empty() {
        return Err(CodecError::TrailingBytes {
            count: reader.len(),
        });
    }
    from_cbor_value(cbor)
}

pub(crate) fn to_cbor(value: &Value) -> CodecResult<Cbor> {
    Ok(match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => Cbor::Integer(Integer::from(*n)),
        Value::Float(f) if f.is_nan() => return Err(CodecError::NotANumber),
        Value::Float(f) => Cbor::Float(*f),
        Value::Text(s) => Cbor::Text(s.clone()),
        Value::Array(items) => {
            Cbor::Array(items.iter().map(to_cbor).collect::<CodecResult<_>>()?)
        }
        Value::Map(entries) => {
            let mut pairs: Vec<(&String, &Value)> = entries.iter().collect();
            // Text keys: longer encodings sort after shorter ones.
            pairs.sort_by(|a, b| {
                a.0.len()
                    .cmp(&b.0.len())
                    .then_with(|| a.0.as_bytes().cmp(b.0.as_bytes()))
            });
            Cbor::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((Cbor::Text(k.clone()), to_cbor(v)?)))
                    .collect::<CodecResult<_>>()?,
            )
        }
    })
}

/// Converts a ciborium value into a document value.
///
/// # Errors
///
/// Fails on NaN, tags, byte strings, non-text or duplicate map keys and
/// integers outside the i64 range.
pub fn from_cbor_value(cbor: Cbor) -> CodecResult<Value> {
    match cbor {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(n) => i64::try_from(n)
            .map(Value::Integer)
            .map_err(|_| CodecError::IntegerOverflow),
        Cbor::Text(s) => Ok(Value::Text(s)),
        Cbor::Float(f) if f.is_nan() => Err(CodecError::NotANumber),
        Cbor::Float(f) => Ok(Value::Float(f)),
        Cbor::Bytes(_) => Err(CodecError::unsupported_type("byte string")),
        Cbor::Tag(tag, _) => Err(CodecError::unsupported_type(format!("tag {tag}"))),
        Cbor::Array(items) => items
            .into_iter()
            .map(from_cbor_value)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        Cbor::Map(pairs) => {
            let mut map = BTreeMap::new();
            for (k, v) in pairs {
                let Cbor::Text(key) = k else {
                    return Err(CodecError::NonTextKey);
                };
                if map.contains_key(&key) {
                    return Err(CodecError::decoding_failed(format!(
                        "duplicate map key `{key}`"
                    )));
                }
                map.insert(key, from_cbor_value(v)?);
            }
            Ok(Value::Map(map))
        }
        _ => Err(CodecError::unsupported_type("unknown CBOR item")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_values_use_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Bool(true)).unwrap(), vec![0xf5]);
        assert_eq!(to_canonical_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(24)).unwrap(),
            vec![0x18, 24]
        );
    }

    #[test]
    fn map_keys_sorted_length_first() {
        let value = Value::map([
            ("bb", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("c", Value::Integer(3)),
        ]);
        let bytes = to_canonical_cbor(&value).unwrap();
        // a3 61 'a' 02 61 'c' 03 62 'b' 'b' 01
        assert_eq!(
            bytes,
            vec![0xa3, 0x61, b'a', 0x02, 0x61, b'c', 0x03, 0x62, b'b', b'b', 0x01]
        );
    }

    #[test]
    fn equal_values_encode_identically() {
        let a = Value::map([("x", Value::from(vec![1, 2])), ("y", Value::from("z"))]);
        let b = Value::map([("y", Value::from("z")), ("x", Value::from(vec![1, 2]))]);
        assert_eq!(to_canonical_cbor(&a).unwrap(), to_canonical_cbor(&b).unwrap());
    }

    #[test]
    fn roundtrip_nested_document() {
        let value = Value::map([
            ("name", Value::from("Alice")),
            ("age", Value::Integer(30)),
            ("tags", Value::from(vec!["a", "b"])),
            ("address", Value::map([("city", Value::from("Arusha"))])),
            ("nothing", Value::Null),
        ]);
        let bytes = to_canonical_cbor(&value).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), value);
    }

    #[test]
    fn floats_use_shortest_lossless_width() {
        // f9 3e00 = half-precision 1.5
        assert_eq!(
            to_canonical_cbor(&Value::Float(1.5)).unwrap(),
            vec![0xf9, 0x3e, 0x00]
        );
        // 0.1 needs all 64 bits.
        assert_eq!(to_canonical_cbor(&Value::Float(0.1)).unwrap().len(), 9);
        assert_eq!(from_cbor(&[0xf9, 0x3c, 0x00]), Ok(Value::Float(1.0)));
    }

    #[test]
    fn floats_survive_a_roundtrip() {
        let value = Value::map([
            ("price", Value::Float(9.99)),
            ("tiny", Value::Float(-1.0e-300)),
            ("edge", Value::Float(f64::NEG_INFINITY)),
            ("whole", Value::Float(3.0)),
        ]);
        let decoded = from_cbor(&to_canonical_cbor(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.get("whole"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn nan_is_rejected_both_ways() {
        let nested = Value::map([("x", Value::from(vec![Value::Float(f64::NAN)]))]);
        assert_eq!(to_canonical_cbor(&nested), Err(CodecError::NotANumber));
        // f9 7e00 = half-precision NaN
        assert_eq!(from_cbor(&[0xf9, 0x7e, 0x00]), Err(CodecError::NotANumber));
    }

    #[test]
    fn rejects_byte_strings() {
        assert!(matches!(
            from_cbor(&[0x42, 0x01, 0x02]),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn rejects_integer_keys() {
        // {1: 2}
        assert_eq!(from_cbor(&[0xa1, 0x01, 0x02]), Err(CodecError::NonTextKey));
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_eq!(
            from_cbor(&[0x01, 0x02]),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(matches!(
            from_cbor(&[0x62, b'a']),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
