//! Optimistic effects.
//!
//! An effect is a pure transformation from the current state and the
//! mutation's input to a new state. Effects are replayed every time the
//! visible tree is rebuilt, so they must not depend on anything but their
//! arguments and their own immutable configuration.

use std::fmt;

use serde_json::Value;

use deltasync_core::{apply, from_json, Operation, Path};

use crate::error::EffectError;

/// A pure `(state, input) -> state` transformation.
pub trait Effect: Send + Sync + fmt::Debug {
    /// Produce the next state. Must not mutate anything reachable from `self`.
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError>;
}

/// Treats the input as an RFC 6902 patch and applies it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchEffect;

impl Effect for PatchEffect {
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError> {
        let ops = from_json(input).map_err(|e| EffectError::InvalidInput(e.to_string()))?;
        Ok(apply(state, &ops)?)
    }
}

/// Appends the input to the array at `path`.
#[derive(Debug, Clone)]
pub struct AppendEffect {
    path: Path,
}

impl AppendEffect {
    pub fn new(path: Path) -> Self {
        Self { path }
    }
}

impl Effect for AppendEffect {
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError> {
        let op = Operation::add(self.path.child("-"), input.clone());
        Ok(apply(state, &[op])?)
    }
}

/// Sets `path` to the input (RFC 6902 `add` semantics).
#[derive(Debug, Clone)]
pub struct SetEffect {
    path: Path,
}

impl SetEffect {
    pub fn new(path: Path) -> Self {
        Self { path }
    }
}

impl Effect for SetEffect {
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError> {
        let op = Operation::add(self.path.clone(), input.clone());
        Ok(apply(state, &[op])?)
    }
}

/// Removes `path`; the input is ignored.
#[derive(Debug, Clone)]
pub struct RemoveEffect {
    path: Path,
}

impl RemoveEffect {
    pub fn new(path: Path) -> Self {
        Self { path }
    }
}

impl Effect for RemoveEffect {
    fn apply(&self, state: &Value, _input: &Value) -> Result<Value, EffectError> {
        Ok(apply(state, &[Operation::remove(self.path.clone())])?)
    }
}

/// Shallow-merges the input object into the object at `path`.
///
/// Members whose input value is `null` are removed.
#[derive(Debug, Clone)]
pub struct MergeEffect {
    path: Path,
}

impl MergeEffect {
    pub fn new(path: Path) -> Self {
        Self { path }
    }
}

impl Effect for MergeEffect {
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError> {
        let Value::Object(props) = input else {
            return Err(EffectError::InvalidInput("merge input must be an object".into()));
        };
        let target = state
            .pointer(&self.path.to_pointer())
            .and_then(Value::as_object)
            .ok_or_else(|| EffectError::InvalidInput(format!("no object at {}", self.path)))?;
        let ops: Vec<Operation> = props
            .iter()
            .filter_map(|(key, value)| {
                let path = self.path.child(key.as_str());
                if value.is_null() {
                    target.contains_key(key).then(|| Operation::remove(path))
                } else {
                    Some(Operation::add(path, value.clone()))
                }
            })
            .collect();
        Ok(apply(state, &ops)?)
    }
}

/// Wraps a plain function pointer.
///
/// Function pointers cannot capture mutable context, which keeps replay
/// deterministic.
#[derive(Clone, Copy)]
pub struct FnEffect {
    name: &'static str,
    f: fn(&Value, &Value) -> Result<Value, EffectError>,
}

impl FnEffect {
    pub const fn new(name: &'static str, f: fn(&Value, &Value) -> Result<Value, EffectError>) -> Self {
        Self { name, f }
    }
}

impl fmt::Debug for FnEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnEffect({})", self.name)
    }
}

impl Effect for FnEffect {
    fn apply(&self, state: &Value, input: &Value) -> Result<Value, EffectError> {
        (self.f)(state, input)
    }
}
