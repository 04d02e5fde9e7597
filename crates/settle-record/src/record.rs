//! Records: one element of a declarative sub-resource collection
//!
//! A [`Record`] is an ordered mapping of field name to [`Value`]. Records
//! carry no server-assigned identifier; their identity is derived from
//! content (see [`RecordIdentity`]).

use crate::convert::ConversionError;
use crate::identity::RecordIdentity;
use crate::value::{encode_entries, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Domain separator for record identity hashing
const IDENTITY_DOMAIN: &[u8] = b"settle.record.v1";

/// One element of a declarative collection
///
/// Field order is preserved for display and serialization but does not
/// affect equality or identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Create empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Get a field value
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the field is present, non-null and non-empty
    #[inline]
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(Value::is_set)
    }

    /// Iterate fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields (including null ones)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Content-derived identity
    ///
    /// Pure and total: hashes the canonical encoding of all non-null fields
    /// sorted by name.
    #[must_use]
    pub fn identity(&self) -> RecordIdentity {
        let mut sorted: Vec<(&str, &Value)> = self.iter().collect();
        sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut hasher = blake3::Hasher::new();
        hasher.update(IDENTITY_DOMAIN);
        encode_entries(&mut hasher, sorted.into_iter());
        RecordIdentity::new(*hasher.finalize().as_bytes())
    }

    /// Required text field
    ///
    /// # Errors
    /// Returns error if the field is missing, null, or not text
    pub fn text(&self, name: &str) -> Result<&str, ConversionError> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ConversionError::MissingField(name.to_string())),
            Some(v) => v.as_text().ok_or_else(|| mismatch(name, "text", v)),
        }
    }

    /// Optional text field (null, missing and empty text all map to `None`)
    ///
    /// # Errors
    /// Returns error if the field holds a non-text value
    pub fn opt_text(&self, name: &str) -> Result<Option<&str>, ConversionError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_text()
                .map(|s| (!s.is_empty()).then_some(s))
                .ok_or_else(|| mismatch(name, "text", v)),
        }
    }

    /// Optional list of text values (missing maps to empty)
    ///
    /// # Errors
    /// Returns error if the field is not a list of text
    pub fn text_list(&self, name: &str) -> Result<Vec<String>, ConversionError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => {
                let items = v.as_list().ok_or_else(|| mismatch(name, "list", v))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_text()
                            .map(str::to_string)
                            .ok_or_else(|| mismatch(name, "text", item))
                    })
                    .collect()
            }
        }
    }

    /// Optional map of text values (missing maps to empty)
    ///
    /// # Errors
    /// Returns error if the field is not a map of text
    pub fn text_map(&self, name: &str) -> Result<BTreeMap<String, String>, ConversionError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(v) => {
                let entries = v.as_map().ok_or_else(|| mismatch(name, "map", v))?;
                entries
                    .iter()
                    .map(|(k, item)| {
                        item.as_text()
                            .map(|s| (k.clone(), s.to_string()))
                            .ok_or_else(|| mismatch(name, "text", item))
                    })
                    .collect()
            }
        }
    }

    /// Optional list of nested records (missing maps to empty)
    ///
    /// # Errors
    /// Returns error if the field is not a list of maps
    pub fn record_list(&self, name: &str) -> Result<Vec<Record>, ConversionError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => {
                let items = v.as_list().ok_or_else(|| mismatch(name, "list", v))?;
                items
                    .iter()
                    .map(|item| {
                        item.as_map()
                            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                            .ok_or_else(|| mismatch(name, "map", item))
                    })
                    .collect()
            }
        }
    }
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        field: field.to_string(),
        expected,
        found: found.type_name(),
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for (name, value) in self.iter().filter(|(_, v)| !v.is_null()) {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Map(record.fields.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(data: &str, kind: &str, transform: &str) -> Record {
        Record::new()
            .with("data", Value::text_ignore_case(data))
            .with("type", kind)
            .with("text_transformation", transform)
    }

    #[test]
    fn identity_deterministic() {
        let r = tuple("User-Agent", "HEADER", "NONE");
        assert_eq!(r.identity(), r.identity());
        assert_eq!(r.identity(), r.clone().identity());
    }

    #[test]
    fn identity_ignores_field_order() {
        let a = tuple("x", "HEADER", "NONE");
        let b = Record::new()
            .with("text_transformation", "NONE")
            .with("type", "HEADER")
            .with("data", Value::text_ignore_case("x"));
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a, b);
    }

    #[test]
    fn identity_folds_case_insensitive_fields() {
        let upper = Record::new().with("data", Value::text_ignore_case("Foo"));
        let lower = Record::new().with("data", Value::text_ignore_case("foo"));
        assert_eq!(upper.identity(), lower.identity());
    }

    #[test]
    fn identity_respects_case_sensitive_fields() {
        let upper = Record::new().with("type", "Header");
        let lower = Record::new().with("type", "header");
        assert_ne!(upper.identity(), lower.identity());
    }

    #[test]
    fn identity_preserves_list_order() {
        let a = Record::new().with("start_after", Value::text_list(["a", "b"]));
        let b = Record::new().with("start_after", Value::text_list(["b", "a"]));
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn identity_null_equals_absent() {
        let with_null = Record::new().with("type", "URI").with("data", Value::Null);
        let absent = Record::new().with("type", "URI");
        assert_eq!(with_null.identity(), absent.identity());
    }

    #[test]
    fn identity_resists_separator_aliasing() {
        let joined = Record::new().with("a", "b-c");
        let split = Record::new().with("a", "b").with("c", "");
        assert_ne!(joined.identity(), split.identity());
    }

    #[test]
    fn identity_distinguishes_null_from_empty_map_in_list() {
        let null = Record::new().with("l", Value::List(vec![Value::Null]));
        let empty = Record::new().with("l", Value::List(vec![Value::Map(BTreeMap::new())]));
        assert_ne!(null.identity(), empty.identity());
    }

    #[test]
    fn display_names_fields() {
        let r = tuple("foo", "HEADER", "NONE");
        assert_eq!(
            r.to_string(),
            r#"{data="foo", type="HEADER", text_transformation="NONE"}"#
        );
    }

    #[test]
    fn typed_accessors() {
        let r = Record::new()
            .with("name", "t1")
            .with("arns", Value::text_list(["arn:1"]))
            .with("tags", Value::text_map([("env", "prod")]))
            .with("empty", "");

        assert_eq!(r.text("name").unwrap(), "t1");
        assert_eq!(r.opt_text("empty").unwrap(), None);
        assert_eq!(r.text_list("arns").unwrap(), vec!["arn:1".to_string()]);
        assert_eq!(r.text_map("tags").unwrap()["env"], "prod");
        assert!(r.text_list("missing").unwrap().is_empty());
        assert!(matches!(
            r.text("missing"),
            Err(ConversionError::MissingField(_))
        ));
        assert!(matches!(
            r.text("arns"),
            Err(ConversionError::TypeMismatch { expected: "text", .. })
        ));
    }

    #[test]
    fn serde_transparent() {
        let r = tuple("foo", "HEADER", "NONE");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(
            json,
            r#"{"data":"foo","type":"HEADER","text_transformation":"NONE"}"#
        );
    }
}
