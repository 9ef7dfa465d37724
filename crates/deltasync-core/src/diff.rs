//! Document diff: produce a patch that turns one tree into another.
//!
//! Only `add`, `remove` and `replace` are emitted. Objects are diffed member
//! by member; arrays are diffed element by element after trimming the common
//! prefix and suffix, with removals emitted back to front so indices stay
//! valid while the patch is applied in order.

use serde_json::{Map, Value};

use crate::apply::json_equal;
use crate::patch::Operation;
use crate::path::Path;

/// Generate operations that transform `src` into `dst`.
///
/// Applying the result to `src` yields a document equal to `dst`.
pub fn diff(src: &Value, dst: &Value) -> Vec<Operation> {
    let mut ops = Vec::new();
    diff_at(&mut ops, &Path::root(), src, dst);
    ops
}

fn diff_at(ops: &mut Vec<Operation>, path: &Path, src: &Value, dst: &Value) {
    if json_equal(src, dst) {
        return;
    }
    match (src, dst) {
        (Value::Object(s), Value::Object(d)) => diff_object(ops, path, s, d),
        (Value::Array(s), Value::Array(d)) => diff_array(ops, path, s, d),
        _ => ops.push(Operation::replace(path.clone(), dst.clone())),
    }
}

fn diff_object(ops: &mut Vec<Operation>, path: &Path, src: &Map<String, Value>, dst: &Map<String, Value>) {
    for key in src.keys() {
        if !dst.contains_key(key) {
            ops.push(Operation::remove(path.child(key.as_str())));
        }
    }
    for (key, dst_val) in dst {
        let child = path.child(key.as_str());
        match src.get(key) {
            Some(src_val) => diff_at(ops, &child, src_val, dst_val),
            None => ops.push(Operation::add(child, dst_val.clone())),
        }
    }
}

fn diff_array(ops: &mut Vec<Operation>, path: &Path, src: &[Value], dst: &[Value]) {
    let prefix = src
        .iter()
        .zip(dst)
        .take_while(|(a, b)| json_equal(a, b))
        .count();
    let suffix = src[prefix..]
        .iter()
        .rev()
        .zip(dst[prefix..].iter().rev())
        .take_while(|(a, b)| json_equal(a, b))
        .count();

    let src_mid = &src[prefix..src.len() - suffix];
    let dst_mid = &dst[prefix..dst.len() - suffix];
    let shared = src_mid.len().min(dst_mid.len());

    for i in 0..shared {
        let idx = prefix + i;
        diff_at(ops, &path.child(idx.to_string()), &src_mid[i], &dst_mid[i]);
    }

    if src_mid.len() > shared {
        for i in (shared..src_mid.len()).rev() {
            ops.push(Operation::remove(path.child((prefix + i).to_string())));
        }
    } else {
        for (i, value) in dst_mid.iter().enumerate().skip(shared) {
            ops.push(Operation::add(path.child((prefix + i).to_string()), value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply;
    use proptest::prelude::*;
    use serde_json::json;

    fn roundtrip(src: Value, dst: Value) {
        let ops = diff(&src, &dst);
        let out = apply(&src, &ops).unwrap();
        assert_eq!(out, dst, "ops: {ops:?}");
    }

    #[test]
    fn test_equal_docs_produce_nothing() {
        assert!(diff(&json!({"a": [1, 2]}), &json!({"a": [1, 2]})).is_empty());
    }

    #[test]
    fn test_scalar_replace() {
        let ops = diff(&json!(1), &json!("one"));
        assert_eq!(ops, vec![Operation::replace(Path::root(), json!("one"))]);
    }

    #[test]
    fn test_object_members() {
        roundtrip(
            json!({"name": "Alice", "age": 30, "gone": true}),
            json!({"name": "Bob", "age": 30, "city": "NYC"}),
        );
    }

    #[test]
    fn test_array_insert_middle() {
        let src = json!([1, 2, 3]);
        let dst = json!([1, 99, 2, 3]);
        roundtrip(src.clone(), dst.clone());
        let ops = diff(&src, &dst);
        assert_eq!(ops, vec![Operation::add(Path::parse("/1").unwrap(), json!(99))]);
    }

    #[test]
    fn test_array_shrink() {
        roundtrip(json!([1, 2, 3, 4, 5]), json!([1, 5]));
    }

    #[test]
    fn test_array_to_empty_and_back() {
        roundtrip(json!([1, 2, 3]), json!([]));
        roundtrip(json!([]), json!(["a", {"b": 1}]));
    }

    #[test]
    fn test_nested() {
        roundtrip(
            json!({"users": [{"id": 1, "tags": ["a"]}, {"id": 2}]}),
            json!({"users": [{"id": 1, "tags": ["a", "b"]}, {"id": 3}], "count": 2}),
        );
    }

    #[test]
    fn test_type_change_inside_array() {
        roundtrip(json!([{"a": 1}, [1]]), json!([[1], {"a": 1}]));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-100i64..100).prop_map(Value::from),
            "[a-c]{0,3}".prop_map(Value::from),
        ]
    }

    fn document() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-d0-2]{1,2}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_diff_roundtrip(src in document(), dst in document()) {
            let ops = diff(&src, &dst);
            let out = apply(&src, &ops).unwrap();
            prop_assert!(json_equal(&out, &dst));
        }

        #[test]
        fn test_diff_of_self_is_empty(doc in document()) {
            prop_assert!(diff(&doc, &doc).is_empty());
        }
    }
}
