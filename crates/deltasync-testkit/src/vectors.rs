//! Golden RFC 6902 vectors.
//!
//! The examples from RFC 6902 Appendix A, plus a few cases that pin down
//! batch atomicity. Each vector is plain JSON so it can be shared with other
//! implementations of the wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deltasync_core::{apply, from_json};

/// A golden test vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: String,
    /// Document the patch is applied to.
    pub doc: Value,
    /// Patch in wire form.
    pub patch: Value,
    /// Resulting document when the patch applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Index of the operation expected to fail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<usize>,
}

/// What running a vector produced.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorOutcome {
    Applied(Value),
    Conflict { index: usize },
    Undecodable(String),
}

const VECTORS: &str = r#"[
  {
    "name": "A.1 adding an object member",
    "doc": {"foo": "bar"},
    "patch": [{"op": "add", "path": "/baz", "value": "qux"}],
    "expected": {"baz": "qux", "foo": "bar"}
  },
  {
    "name": "A.2 adding an array element",
    "doc": {"foo": ["bar", "baz"]},
    "patch": [{"op": "add", "path": "/foo/1", "value": "qux"}],
    "expected": {"foo": ["bar", "qux", "baz"]}
  },
  {
    "name": "A.3 removing an object member",
    "doc": {"baz": "qux", "foo": "bar"},
    "patch": [{"op": "remove", "path": "/baz"}],
    "expected": {"foo": "bar"}
  },
  {
    "name": "A.4 removing an array element",
    "doc": {"foo": ["bar", "qux", "baz"]},
    "patch": [{"op": "remove", "path": "/foo/1"}],
    "expected": {"foo": ["bar", "baz"]}
  },
  {
    "name": "A.5 replacing a value",
    "doc": {"baz": "qux", "foo": "bar"},
    "patch": [{"op": "replace", "path": "/baz", "value": "boo"}],
    "expected": {"baz": "boo", "foo": "bar"}
  },
  {
    "name": "A.6 moving a value",
    "doc": {"foo": {"bar": "baz", "waldo": "fred"}, "qux": {"corge": "grault"}},
    "patch": [{"op": "move", "from": "/foo/waldo", "path": "/qux/thud"}],
    "expected": {"foo": {"bar": "baz"}, "qux": {"corge": "grault", "thud": "fred"}}
  },
  {
    "name": "A.7 moving an array element",
    "doc": {"foo": ["all", "grass", "cows", "eat"]},
    "patch": [{"op": "move", "from": "/foo/1", "path": "/foo/3"}],
    "expected": {"foo": ["all", "cows", "eat", "grass"]}
  },
  {
    "name": "A.8 testing a value: success",
    "doc": {"baz": "qux", "foo": ["a", 2, "c"]},
    "patch": [
      {"op": "test", "path": "/baz", "value": "qux"},
      {"op": "test", "path": "/foo/1", "value": 2}
    ],
    "expected": {"baz": "qux", "foo": ["a", 2, "c"]}
  },
  {
    "name": "A.9 testing a value: error",
    "doc": {"baz": "qux"},
    "patch": [{"op": "test", "path": "/baz", "value": "bar"}],
    "error_at": 0
  },
  {
    "name": "A.10 adding a nested member object",
    "doc": {"foo": "bar"},
    "patch": [{"op": "add", "path": "/child", "value": {"grandchild": {}}}],
    "expected": {"foo": "bar", "child": {"grandchild": {}}}
  },
  {
    "name": "A.11 ignoring unrecognized elements",
    "doc": {"foo": "bar"},
    "patch": [{"op": "add", "path": "/baz", "value": "qux", "xyz": 123}],
    "expected": {"foo": "bar", "baz": "qux"}
  },
  {
    "name": "A.12 adding to a nonexistent target",
    "doc": {"foo": "bar"},
    "patch": [{"op": "add", "path": "/baz/bat", "value": "qux"}],
    "error_at": 0
  },
  {
    "name": "A.14 ~ escape ordering",
    "doc": {"/": 9, "~1": 10},
    "patch": [{"op": "test", "path": "/~01", "value": 10}],
    "expected": {"/": 9, "~1": 10}
  },
  {
    "name": "A.15 comparing strings and numbers",
    "doc": {"/": 9, "~1": 10},
    "patch": [{"op": "test", "path": "/~01", "value": "10"}],
    "error_at": 0
  },
  {
    "name": "A.16 adding an array value",
    "doc": {"foo": ["bar"]},
    "patch": [{"op": "add", "path": "/foo/-", "value": ["abc", "def"]}],
    "expected": {"foo": ["bar", ["abc", "def"]]}
  },
  {
    "name": "batch fails on its second operation",
    "doc": {"items": [1]},
    "patch": [
      {"op": "add", "path": "/items/-", "value": 2},
      {"op": "remove", "path": "/missing"}
    ],
    "error_at": 1
  },
  {
    "name": "later operations see earlier ones",
    "doc": {},
    "patch": [
      {"op": "add", "path": "/list", "value": []},
      {"op": "add", "path": "/list/-", "value": "a"},
      {"op": "copy", "from": "/list", "path": "/copy"},
      {"op": "replace", "path": "/list/0", "value": "b"}
    ],
    "expected": {"list": ["b"], "copy": ["a"]}
  },
  {
    "name": "numbers compare by value",
    "doc": {"n": 1.0},
    "patch": [{"op": "test", "path": "/n", "value": 1}],
    "expected": {"n": 1.0}
  }
]"#;

/// Get all golden test vectors.
pub fn all_vectors() -> serde_json::Result<Vec<GoldenVector>> {
    serde_json::from_str(VECTORS)
}

/// Decode and apply a vector's patch.
pub fn run_vector(vector: &GoldenVector) -> VectorOutcome {
    let ops = match from_json(&vector.patch) {
        Ok(ops) => ops,
        Err(e) => return VectorOutcome::Undecodable(e.to_string()),
    };
    match apply(&vector.doc, &ops) {
        Ok(doc) => VectorOutcome::Applied(doc),
        Err(conflict) => VectorOutcome::Conflict {
            index: conflict.index,
        },
    }
}

/// Whether a vector produced what it expects.
pub fn vector_passes(vector: &GoldenVector) -> bool {
    match (run_vector(vector), &vector.expected, vector.error_at) {
        (VectorOutcome::Applied(doc), Some(expected), None) => doc == *expected,
        (VectorOutcome::Conflict { index }, None, Some(at)) => index == at,
        _ => false,
    }
}

/// Run every golden vector, returning `(name, passed)` pairs.
pub fn verify_all_vectors() -> serde_json::Result<Vec<(String, bool)>> {
    Ok(all_vectors()?
        .iter()
        .map(|v| (v.name.clone(), vector_passes(v)))
        .collect())
}
