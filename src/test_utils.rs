pub use proptest::prelude::*;

use serde_json::{Map, Value};

/// Arbitrary JSON values.
///
/// Floats are left out because `serde_json` does not guarantee exact float
/// round trips without the `float_roundtrip` feature.
pub fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        ".*".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::btree_map(".*", inner, 0..4)
                .prop_map(|entries| Value::Object(entries.into_iter().collect())),
        ]
    })
}

pub fn arb_json_object() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map(".*", arb_json(), 0..4)
        .prop_map(|entries| entries.into_iter().collect())
}
