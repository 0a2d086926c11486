//! Property-based test generators using proptest.
//!
//! Provides strategies for attribute names and document values that a
//! persistent object can store.

use persistdb_codec::Value;
use persistdb_core::is_reserved_attribute;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for attribute names that are not reserved.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}")
        .expect("Invalid regex")
        .prop_filter("Attribute name must not be reserved", |s| {
            !is_reserved_attribute(s)
        })
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        any::<f64>()
            .prop_filter("NaN cannot be stored", |f| !f.is_nan())
            .prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for arbitrary nested values.
///
/// Maps never carry a `$class` key, which is how embedded objects are
/// stored.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(attribute_name_strategy(), inner, 0..4)
                .prop_map(Value::Map),
        ]
    })
}

/// Strategy for an object's attributes.
pub fn attributes_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map(attribute_name_strategy(), value_strategy(), 0..8)
}

/// Strategy for small integer lists, for array-length queries.
pub fn int_list_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..100, 0..8)
}
