//! Document paths: RFC 6901 JSON pointers as token sequences.
//!
//! A path is stored already unescaped, one `String` per reference token.
//! Whether a token addresses an array element or an object member is decided
//! when the path is resolved against a tree, never when it is parsed, so a
//! numeric-looking token such as `"0"` is a plain key inside an object.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::PointerError;

/// The array "append" token.
pub const APPEND_TOKEN: &str = "-";

/// A parsed JSON pointer.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<String>);

impl Path {
    /// The root path (empty pointer `""`).
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from already-unescaped tokens.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Parse a pointer string such as `/a/b~1c/0`.
    pub fn parse(pointer: &str) -> Result<Self, PointerError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let Some(rest) = pointer.strip_prefix('/') else {
            return Err(PointerError {
                pointer: pointer.to_string(),
                reason: "must be empty or start with '/'",
            });
        };
        rest.split('/')
            .map(|raw| unescape(raw).ok_or_else(|| PointerError {
                pointer: pointer.to_string(),
                reason: "'~' must be followed by '0' or '1'",
            }))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Format back to a pointer string.
    pub fn to_pointer(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 8);
        for token in &self.0 {
            out.push('/');
            out.push_str(&escape(token));
        }
        out
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the parent path and the last token.
    ///
    /// Returns `None` for the root.
    pub fn split_last(&self) -> Option<(&[String], &str)> {
        self.0
            .split_last()
            .map(|(last, parent)| (parent, last.as_str()))
    }

    /// Return a new path with `token` appended.
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }

    /// Whether `self` is a proper prefix of `other`.
    pub fn is_proper_prefix_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

/// Parse an array index token.
///
/// Accepts `0` and decimal numbers without a leading zero. The append token
/// is handled by callers.
pub fn parse_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn escape(token: &str) -> String {
    if token.contains(['~', '/']) {
        token.replace('~', "~0").replace('/', "~1")
    } else {
        token.to_string()
    }
}

fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('~') {
        return Some(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({:?})", self.to_pointer())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.to_pointer())
        }
    }
}

impl std::str::FromStr for Path {
    type Err = PointerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_pointer())
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Path::parse(&raw).map_err(serde::de::Error::custom)
    }
}
