//! SQL injection match set tuples
//!
//! A match set holds tuples with no server-side ID; the remote deletes a
//! tuple by restating it. The remote compares `field_to_match.data`
//! case-insensitively, so it is emitted as case-insensitive text.

use crate::nested;
use serde::{Deserialize, Serialize};
use settle_record::{ConversionError, FromRecord, Operation, Record, RecordRules, ToRecord, Value};

/// Part of a web request to inspect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldToMatch {
    /// Request component (`HEADER`, `QUERY_STRING`, `URI`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Header or argument name, when the component needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl FieldToMatch {
    /// Component without a name
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
        }
    }

    /// Named component, e.g. a specific header
    #[must_use]
    pub fn named(kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data.into()),
        }
    }
}

impl ToRecord for FieldToMatch {
    fn to_record(&self) -> Record {
        let mut record = Record::new();
        if let Some(data) = self.data.as_deref().filter(|d| !d.is_empty()) {
            record.insert("data", Value::text_ignore_case(data));
        }
        record.insert("type", self.kind.as_str());
        record
    }

    fn rules() -> RecordRules {
        RecordRules::none().required("type")
    }
}

impl FromRecord for FieldToMatch {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            kind: record.text("type")?.to_string(),
            // canonical state is lower-cased, as the remote reports it
            data: record.opt_text("data")?.map(str::to_lowercase),
        })
    }
}

/// One tuple of an SQL injection match set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlInjectionMatchTuple {
    /// Where to look
    pub field_to_match: FieldToMatch,
    /// Transformation applied before inspection (`NONE`, `URL_DECODE`, ...)
    pub text_transformation: String,
}

impl SqlInjectionMatchTuple {
    /// Create tuple
    #[must_use]
    pub fn new(field_to_match: FieldToMatch, text_transformation: impl Into<String>) -> Self {
        Self {
            field_to_match,
            text_transformation: text_transformation.into(),
        }
    }
}

impl ToRecord for SqlInjectionMatchTuple {
    fn to_record(&self) -> Record {
        Record::new()
            .with("field_to_match", self.field_to_match.to_record())
            .with("text_transformation", self.text_transformation.as_str())
    }

    fn rules() -> RecordRules {
        RecordRules::none()
            .required("field_to_match")
            .required("text_transformation")
    }
}

impl FromRecord for SqlInjectionMatchTuple {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(Self {
            field_to_match: FieldToMatch::from_record(&nested(record, "field_to_match")?)?,
            text_transformation: record.text("text_transformation")?.to_string(),
        })
    }
}

/// Wire action of a match set update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    /// Add the tuple
    Insert,
    /// Remove the tuple
    Delete,
}

/// One entry of a match set update request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchSetUpdate {
    /// Insert or delete
    pub action: ChangeAction,
    /// The tuple
    pub sql_injection_match_tuple: SqlInjectionMatchTuple,
}

/// Translate engine operations into a match set update request
///
/// # Errors
/// Returns error if an operation's record is not a match tuple
pub fn updates_from_operations(
    operations: &[Operation],
) -> Result<Vec<MatchSetUpdate>, ConversionError> {
    operations
        .iter()
        .map(|op| {
            let action = match op {
                Operation::Add(_) => ChangeAction::Insert,
                Operation::Remove(_) => ChangeAction::Delete,
            };
            Ok(MatchSetUpdate {
                action,
                sql_injection_match_tuple: SqlInjectionMatchTuple::from_record(op.record())?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use settle_record::{diff, RecordSet};

    fn header(name: &str) -> SqlInjectionMatchTuple {
        SqlInjectionMatchTuple::new(FieldToMatch::named("HEADER", name), "NONE")
    }

    #[test]
    fn header_name_case_is_ignored() {
        assert_eq!(
            header("User-Agent").to_record().identity(),
            header("user-agent").to_record().identity()
        );
        assert_ne!(
            header("User-Agent").to_record().identity(),
            SqlInjectionMatchTuple::new(FieldToMatch::named("HEADER", "User-Agent"), "URL_DECODE")
                .to_record()
                .identity()
        );
    }

    #[test]
    fn from_record_lowercases_data() {
        let parsed = SqlInjectionMatchTuple::from_record(&header("Referer").to_record()).unwrap();
        assert_eq!(parsed, header("referer"));
    }

    #[test]
    fn missing_data_is_absent() {
        let tuple = SqlInjectionMatchTuple::new(FieldToMatch::new("URI"), "NONE");
        let record = tuple.to_record();
        assert_eq!(
            record.to_string(),
            r#"{field_to_match={type="URI"}, text_transformation="NONE"}"#
        );
        assert_eq!(SqlInjectionMatchTuple::from_record(&record).unwrap(), tuple);
    }

    #[test]
    fn missing_transformation_fails_validation() {
        let bad = [SqlInjectionMatchTuple::new(FieldToMatch::new("URI"), "")];
        assert!(RecordSet::from_items(&bad).is_err());
    }

    #[test]
    fn operations_translate_to_updates() {
        let previous = RecordSet::from_items(&[header("a"), header("b")]).unwrap();
        let desired = RecordSet::from_items(&[header("B"), header("c")]).unwrap();
        let ops = diff(&previous, &desired).into_operations();

        let updates = updates_from_operations(&ops).unwrap();
        assert_eq!(
            updates,
            vec![
                MatchSetUpdate {
                    action: ChangeAction::Delete,
                    sql_injection_match_tuple: header("a"),
                },
                MatchSetUpdate {
                    action: ChangeAction::Insert,
                    sql_injection_match_tuple: header("c"),
                },
            ]
        );
    }

    #[test]
    fn foreign_record_is_rejected() {
        let ops = [Operation::Add(Record::new().with("name", "x"))];
        assert!(matches!(
            updates_from_operations(&ops),
            Err(ConversionError::MissingField(_))
        ));
    }

    #[test]
    fn deserializes_from_yaml() {
        let yaml = "field_to_match:\n  type: QUERY_STRING\ntext_transformation: URL_DECODE\n";
        let tuple: SqlInjectionMatchTuple = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            tuple,
            SqlInjectionMatchTuple::new(FieldToMatch::new("QUERY_STRING"), "URL_DECODE")
        );
    }
}
