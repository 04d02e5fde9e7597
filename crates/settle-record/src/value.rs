//! Field values carried by records
//!
//! Provides [`Value`], the scalar-or-nested value stored under each record
//! field, plus the canonical byte encoding used for identity hashing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Tag bytes for the canonical encoding
mod tag {
    pub(super) const NULL: u8 = 0;
    pub(super) const BOOL: u8 = 1;
    pub(super) const INT: u8 = 2;
    pub(super) const TEXT: u8 = 3;
    pub(super) const LIST: u8 = 4;
    pub(super) const MAP: u8 = 5;
}

/// A single field value
///
/// `TextIgnoreCase` compares case-insensitively: it is lower-cased before
/// hashing so identity follows the remote system's comparison semantics.
/// Lists keep declaration order; maps are keyed and ordered by key.
///
/// Serializes untagged, so the case-insensitivity flag does not survive a
/// serde round trip (deserialized strings are always [`Value::Text`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit absence; equivalent to the field not being present
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Case-sensitive text
    Text(String),
    /// Case-insensitive text
    TextIgnoreCase(String),
    /// Ordered list
    List(Vec<Value>),
    /// Keyed map
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Case-sensitive text value
    #[inline]
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Case-insensitive text value
    #[inline]
    #[must_use]
    pub fn text_ignore_case(s: impl Into<String>) -> Self {
        Self::TextIgnoreCase(s.into())
    }

    /// List of text values, in the given order
    #[must_use]
    pub fn text_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(|s| Self::Text(s.into())).collect())
    }

    /// Map of text values
    #[must_use]
    pub fn text_map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Self::Text(v.into())))
                .collect(),
        )
    }

    /// Whether this value is [`Value::Null`]
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value counts as "set" for constraint checks
    ///
    /// Null, empty text, empty lists and empty maps are unset.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(_) | Self::Int(_) => true,
            Self::Text(s) | Self::TextIgnoreCase(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
        }
    }

    /// Borrow as text (either case mode)
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::TextIgnoreCase(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as list
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as map
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Short type name, used in conversion errors
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) | Self::TextIgnoreCase(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Feed the canonical encoding of this value into `hasher`
    ///
    /// Every value is type-tagged and length-prefixed so that distinct
    /// structures cannot produce the same byte stream. Null entries inside
    /// maps are skipped, matching top-level field handling.
    pub(crate) fn encode_canonical(&self, hasher: &mut blake3::Hasher) {
        match self {
            // only reachable inside lists; fields and map entries skip nulls
            Self::Null => {
                hasher.update(&[tag::NULL]);
            }
            Self::Bool(b) => {
                hasher.update(&[tag::BOOL, u8::from(*b)]);
            }
            Self::Int(i) => {
                hasher.update(&[tag::INT]);
                hasher.update(&i.to_le_bytes());
            }
            Self::Text(s) => {
                hasher.update(&[tag::TEXT]);
                encode_str(hasher, s);
            }
            Self::TextIgnoreCase(s) => {
                hasher.update(&[tag::TEXT]);
                encode_str(hasher, &s.to_lowercase());
            }
            Self::List(items) => {
                hasher.update(&[tag::LIST]);
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode_canonical(hasher);
                }
            }
            Self::Map(entries) => {
                encode_entries(hasher, entries.iter().map(|(k, v)| (k.as_str(), v)));
            }
        }
    }
}

/// Encode a keyed collection, skipping nulls
///
/// Entries must already be sorted by key.
pub(crate) fn encode_entries<'a, I>(hasher: &mut blake3::Hasher, entries: I)
where
    I: Iterator<Item = (&'a str, &'a Value)>,
{
    let present: Vec<_> = entries.filter(|(_, v)| !v.is_null()).collect();
    hasher.update(&[tag::MAP]);
    hasher.update(&(present.len() as u64).to_le_bytes());
    for (key, value) in present {
        encode_str(hasher, key);
        value.encode_canonical(hasher);
    }
}

fn encode_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) | Self::TextIgnoreCase(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
