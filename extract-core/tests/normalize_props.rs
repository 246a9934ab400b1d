use crowdfund_extract::normalize::{flatten, unflatten, PATH_SEPARATOR};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 %]{0,12}".prop_map(Value::from),
        prop::collection::vec("[a-z]{0,4}".prop_map(Value::from), 0..3).prop_map(Value::Array),
    ]
}

/// Nested maps without empty objects, whose keys never contain the separator.
fn tree() -> impl Strategy<Value = Map<String, Value>> {
    let value = leaf().prop_recursive(3, 32, 4, |inner| {
        prop::collection::btree_map("[a-z_]{1,6}", inner, 1..4)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    });
    prop::collection::btree_map("[a-z_]{1,6}", value, 0..6)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    #[test]
    fn test_flatten_unflatten_round_trip(map in tree()) {
        prop_assert_eq!(unflatten(&flatten(&map)), map);
    }

    #[test]
    fn test_flattened_values_are_never_objects(map in tree()) {
        let flat = flatten(&map);
        prop_assert!(flat.values().all(|value| !value.is_object()));
    }

    #[test]
    fn test_flattened_paths_are_non_empty_segments(map in tree()) {
        for path in flatten(&map).keys() {
            prop_assert!(path.split(PATH_SEPARATOR).all(|segment| !segment.is_empty()));
        }
    }
}
