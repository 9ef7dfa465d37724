//! Patch application.
//!
//! Every operation resolves its path against the tree as modified by the
//! operations before it in the same batch. A batch is all-or-nothing: [`apply`]
//! works on a private copy and only hands it back when every operation
//! succeeded.

use serde_json::Value;

use crate::error::{ConflictKind, PatchConflict};
use crate::patch::Operation;
use crate::path::{parse_index, Path, APPEND_TOKEN};

/// Apply `ops` to `tree`, returning the patched copy.
///
/// `tree` is never modified, so readers holding the previous snapshot stay
/// valid. On conflict nothing is returned but the error.
pub fn apply(tree: &Value, ops: &[Operation]) -> Result<Value, PatchConflict> {
    let mut next = tree.clone();
    apply_in_place(&mut next, ops)?;
    Ok(next)
}

/// Apply `ops` directly to `doc`.
///
/// On error `doc` may be partially patched; only call this on a scratch copy
/// that is dropped when an error comes back.
pub fn apply_in_place(doc: &mut Value, ops: &[Operation]) -> Result<(), PatchConflict> {
    for (index, op) in ops.iter().enumerate() {
        apply_op(doc, op).map_err(|kind| PatchConflict {
            index,
            op: op.name(),
            kind,
        })?;
    }
    Ok(())
}

fn apply_op(doc: &mut Value, op: &Operation) -> Result<(), ConflictKind> {
    match op {
        Operation::Add { path, value } => add(doc, path, value.clone()),
        Operation::Remove { path } => remove(doc, path).map(drop),
        Operation::Replace { path, value } => replace(doc, path, value.clone()),
        Operation::Move { from, path } => {
            if from == path {
                return resolve(doc, from.tokens()).map(drop);
            }
            if from.is_proper_prefix_of(path) {
                return Err(ConflictKind::MoveIntoDescendant {
                    from: from.to_pointer(),
                    path: path.to_pointer(),
                });
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        Operation::Copy { from, path } => {
            let value = resolve(doc, from.tokens())?.clone();
            add(doc, path, value)
        }
        Operation::Test { path, value } => {
            let actual = resolve(doc, path.tokens())?;
            if json_equal(actual, value) {
                Ok(())
            } else {
                Err(ConflictKind::TestFailed {
                    path: path.to_pointer(),
                })
            }
        }
    }
}

fn add(doc: &mut Value, path: &Path, value: Value) -> Result<(), ConflictKind> {
    let Some((parent, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parent)? {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == APPEND_TOKEN {
                arr.push(value);
                return Ok(());
            }
            let idx = parse_index(last).ok_or_else(|| invalid_index(path, last))?;
            if idx > arr.len() {
                return Err(invalid_index(path, last));
            }
            arr.insert(idx, value);
            Ok(())
        }
        _ => Err(ConflictKind::NotAContainer {
            path: pointer(parent),
        }),
    }
}

fn remove(doc: &mut Value, path: &Path) -> Result<Value, ConflictKind> {
    let Some((parent, last)) = path.split_last() else {
        return Err(ConflictKind::RemoveRoot);
    };
    match resolve_mut(doc, parent)? {
        Value::Object(map) => map.remove(last).ok_or_else(|| not_found(path.tokens())),
        Value::Array(arr) => {
            let idx = element_index(path, last, arr.len())?;
            Ok(arr.remove(idx))
        }
        _ => Err(ConflictKind::NotAContainer {
            path: pointer(parent),
        }),
    }
}

fn replace(doc: &mut Value, path: &Path, value: Value) -> Result<(), ConflictKind> {
    let Some((parent, last)) = path.split_last() else {
        *doc = value;
        return Ok(());
    };
    match resolve_mut(doc, parent)? {
        Value::Object(map) => match map.get_mut(last) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(not_found(path.tokens())),
        },
        Value::Array(arr) => {
            let idx = element_index(path, last, arr.len())?;
            arr[idx] = value;
            Ok(())
        }
        _ => Err(ConflictKind::NotAContainer {
            path: pointer(parent),
        }),
    }
}

/// Index of an existing array element; `-` and out-of-range are not found.
fn element_index(path: &Path, token: &str, len: usize) -> Result<usize, ConflictKind> {
    if token == APPEND_TOKEN {
        return Err(not_found(path.tokens()));
    }
    let idx = parse_index(token).ok_or_else(|| invalid_index(path, token))?;
    if idx >= len {
        return Err(not_found(path.tokens()));
    }
    Ok(idx)
}

fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Result<&'a Value, ConflictKind> {
    let mut current = doc;
    for (depth, token) in tokens.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get(token),
            Value::Array(arr) => {
                if token != APPEND_TOKEN && parse_index(token).is_none() {
                    return Err(ConflictKind::InvalidIndex {
                        path: pointer(&tokens[..=depth]),
                        token: token.clone(),
                    });
                }
                parse_index(token).and_then(|idx| arr.get(idx))
            }
            _ => {
                return Err(ConflictKind::NotAContainer {
                    path: pointer(&tokens[..depth]),
                })
            }
        }
        .ok_or_else(|| not_found(&tokens[..=depth]))?;
    }
    Ok(current)
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value, ConflictKind> {
    let mut current = doc;
    for (depth, token) in tokens.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get_mut(token),
            Value::Array(arr) => {
                if token != APPEND_TOKEN && parse_index(token).is_none() {
                    return Err(ConflictKind::InvalidIndex {
                        path: pointer(&tokens[..=depth]),
                        token: token.clone(),
                    });
                }
                parse_index(token).and_then(|idx| arr.get_mut(idx))
            }
            _ => {
                return Err(ConflictKind::NotAContainer {
                    path: pointer(&tokens[..depth]),
                })
            }
        }
        .ok_or_else(|| not_found(&tokens[..=depth]))?;
    }
    Ok(current)
}

/// Deep structural equality.
///
/// Numbers compare by numeric value, so `1` and `1.0` are equal; everything
/// else compares exactly. Object member order is irrelevant.
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y
                || matches!((x.as_f64(), y.as_f64()), (Some(x), Some(y)) if x == y)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| json_equal(v, w)))
        }
        _ => a == b,
    }
}

fn pointer(tokens: &[String]) -> String {
    Path::from_tokens(tokens.iter().cloned()).to_pointer()
}

fn not_found(tokens: &[String]) -> ConflictKind {
    ConflictKind::NotFound {
        path: pointer(tokens),
    }
}

fn invalid_index(path: &Path, token: &str) -> ConflictKind {
    ConflictKind::InvalidIndex {
        path: path.to_pointer(),
        token: token.to_string(),
    }
}
