//! Attribute value representation. Directory attributes may hold binary or
//! textual data; both share one byte-backed representation so that a jpeg
//! and a utf8 name flow through the same assertion paths. Equality is byte
//! exact. Anything smarter (matching rules, normalisation) is the concern
//! of the evaluator's predicate, not this type.

use std::borrow::Cow;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smartstring::alias::String as AttrString;

#[derive(Clone, Serialize, Deserialize)]
pub struct AttributeValue {
    bytes: Vec<u8>,
    // An optional syntax oid tag, carried for diagnostics. Not part of
    // equality.
    syntax: Option<AttrString>,
}

impl AttributeValue {
    pub fn new(bytes: Vec<u8>) -> Self {
        AttributeValue {
            bytes,
            syntax: None,
        }
    }

    pub fn with_syntax(mut self, syntax: &str) -> Self {
        self.syntax = Some(syntax.into());
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn syntax(&self) -> Option<&str> {
        self.syntax.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The value as utf8, if it is valid utf8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Ascii case insensitive comparison, used for approx matching and the
    /// objectClass refinement check.
    pub fn eq_ignore_ascii_case(&self, other: &AttributeValue) -> bool {
        self.bytes.eq_ignore_ascii_case(&other.bytes)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::new(s.as_bytes().to_vec())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::new(s.into_bytes())
    }
}

impl From<&[u8]> for AttributeValue {
    fn from(b: &[u8]) -> Self {
        AttributeValue::new(b.to_vec())
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::new(b)
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for AttributeValue {}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state)
    }
}

impl std::fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "AttributeValue({s:?})"),
            None => write!(f, "AttributeValue({} bytes)", self.bytes.len()),
        }
    }
}
