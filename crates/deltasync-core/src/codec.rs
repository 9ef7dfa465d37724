//! Wire codecs for patches.
//!
//! JSON is the RFC 6902 array-of-objects form. CBOR carries the same
//! structure in a compact binary frame for transports that prefer bytes.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::patch::Operation;

/// Encode a patch as an RFC 6902 JSON array.
pub fn to_json(ops: &[Operation]) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(ops)?)
}

/// Decode an RFC 6902 JSON array.
pub fn from_json(value: &Value) -> Result<Vec<Operation>, CodecError> {
    Ok(Vec::<Operation>::deserialize(value)?)
}

/// Encode a patch as CBOR.
pub fn to_cbor(ops: &[Operation]) -> Result<Bytes, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(&ops, &mut buf).map_err(|e| CodecError::CborEncode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode a CBOR-encoded patch.
pub fn from_cbor(bytes: &[u8]) -> Result<Vec<Operation>, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use serde_json::json;

    fn sample() -> Vec<Operation> {
        vec![
            Operation::add(Path::parse("/a/-").unwrap(), json!({"x": [1, 2.5, null]})),
            Operation::remove(Path::parse("/b~1c").unwrap()),
            Operation::move_to(Path::parse("/d").unwrap(), Path::parse("/e").unwrap()),
            Operation::test(Path::root(), json!("s")),
        ]
    }

    #[test]
    fn test_json_shape() {
        let wire = to_json(&sample()[1..2]).unwrap();
        assert_eq!(wire, json!([{"op": "remove", "path": "/b~1c"}]));
    }

    #[test]
    fn test_json_roundtrip_keeps_every_op() {
        let ops = sample();
        let wire = to_json(&ops).unwrap();
        assert_eq!(wire.as_array().map(Vec::len), Some(ops.len()));
        assert!(wire.as_array().unwrap().iter().all(|op| op.get("op").is_some()));
        assert_eq!(from_json(&wire).unwrap(), ops);
    }

    #[test]
    fn test_json_decode() {
        let wire = json!([
            {"op": "copy", "from": "/a", "path": "/b"},
            {"op": "replace", "path": "", "value": 3}
        ]);
        let ops = from_json(&wire).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1], Operation::replace(Path::root(), json!(3)));
    }

    #[test]
    fn test_json_decode_rejects_non_array() {
        assert!(from_json(&json!({"op": "add"})).is_err());
    }

    #[test]
    fn test_cbor_roundtrip() {
        let ops = sample();
        let bytes = to_cbor(&ops).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), ops);
    }

    #[test]
    fn test_cbor_garbage() {
        assert!(from_cbor(&[0xff, 0x00, 0x13]).is_err());
    }
}
