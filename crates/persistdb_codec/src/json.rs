//! Conversions between document values and JSON.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use serde_json::Value as Json;
use std::collections::BTreeMap;

impl TryFrom<Json> for Value {
    type Error = CodecError;

    fn try_from(json: Json) -> CodecResult<Self> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if n.is_u64() {
                    Err(CodecError::IntegerOverflow)
                } else {
                    n.as_f64()
                        .map(Value::Float)
                        .ok_or_else(|| CodecError::unsupported_type("JSON number"))
                }
            }
            Json::String(s) => Ok(Value::Text(s)),
            Json::Array(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array),
            Json::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                .collect::<CodecResult<BTreeMap<String, Value>>>()
                .map(Value::Map),
        }
    }
}

impl From<&Value> for Json {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Integer(n) => Json::from(*n),
            // Non-finite floats have no JSON form and render as null.
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::Text(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Json::from).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Json::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Value {
    /// Renders this value as compact JSON text.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        Json::from(self).to_string()
    }
}
