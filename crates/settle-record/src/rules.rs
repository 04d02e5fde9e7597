//! Per-resource record constraints
//!
//! [`RecordRules`] are checked while building a [`RecordSet`](crate::RecordSet)
//! so invalid desired state fails before any remote call is made.

use crate::record::Record;

/// A single constraint on a record's fields
#[derive(Debug, Clone)]
pub enum Constraint {
    /// At most one of these fields may be set
    MutuallyExclusive(Vec<String>),
    /// This field must be set
    Required(String),
    /// If set, this text field must pass `check`
    Format {
        /// Checked field
        field: String,
        /// Expected shape, for error messages
        expected: String,
        /// Accepts well-formed values
        check: fn(&str) -> bool,
    },
}

/// Set of constraints for one resource's records
#[derive(Debug, Clone, Default)]
pub struct RecordRules {
    constraints: Vec<Constraint>,
}

impl RecordRules {
    /// No constraints
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a mutual-exclusion constraint
    #[must_use]
    pub fn mutually_exclusive<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints.push(Constraint::MutuallyExclusive(
            fields.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Add a required-field constraint
    #[must_use]
    pub fn required(mut self, field: impl Into<String>) -> Self {
        self.constraints.push(Constraint::Required(field.into()));
        self
    }

    /// Add a format constraint on a text field
    #[must_use]
    pub fn format(
        mut self,
        field: impl Into<String>,
        expected: impl Into<String>,
        check: fn(&str) -> bool,
    ) -> Self {
        self.constraints.push(Constraint::Format {
            field: field.into(),
            expected: expected.into(),
            check,
        });
        self
    }

    /// Constraints in declaration order
    #[inline]
    #[must_use]
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Check a record against every constraint
    ///
    /// # Errors
    /// Returns the first violated constraint
    pub fn check(&self, record: &Record) -> Result<(), ValidationError> {
        for constraint in &self.constraints {
            match constraint {
                Constraint::MutuallyExclusive(fields) => {
                    let set: Vec<String> = fields
                        .iter()
                        .filter(|f| record.is_set(f))
                        .cloned()
                        .collect();
                    if set.len() > 1 {
                        return Err(ValidationError::MutuallyExclusive {
                            fields: fields.clone(),
                            set,
                            record: record.to_string(),
                        });
                    }
                }
                Constraint::Required(field) => {
                    if !record.is_set(field) {
                        return Err(ValidationError::MissingField {
                            field: field.clone(),
                            record: record.to_string(),
                        });
                    }
                }
                Constraint::Format {
                    field,
                    expected,
                    check,
                } => {
                    let value = record.get(field).filter(|v| v.is_set());
                    if let Some(value) = value {
                        if !value.as_text().is_some_and(*check) {
                            return Err(ValidationError::InvalidFormat {
                                field: field.clone(),
                                value: value.to_string(),
                                expected: expected.clone(),
                                record: record.to_string(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Desired-state record violates a domain invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// More than one mutually exclusive field set
    #[error("only one of {} can be set, found {} in record {record}", .fields.join(", "), .set.join(", "))]
    MutuallyExclusive {
        /// The exclusive group
        fields: Vec<String>,
        /// Fields from the group that were set
        set: Vec<String>,
        /// Offending record, rendered
        record: String,
    },

    /// Required field missing or empty
    #[error("required field {field} is not set in record {record}")]
    MissingField {
        /// Missing field name
        field: String,
        /// Offending record, rendered
        record: String,
    },

    /// Field set to a malformed value
    #[error("field {field} has value {value}, expected {expected}, in record {record}")]
    InvalidFormat {
        /// Field name
        field: String,
        /// Offending value, rendered
        value: String,
        /// Expected shape
        expected: String,
        /// Offending record, rendered
        record: String,
    },
}
