//! Translation between resource-specific shapes and generic records
//!
//! Each resource implements [`ToRecord`] (and usually [`FromRecord`]) so the
//! reconciliation engine stays generic over [`Record`].

use crate::record::Record;
use crate::rules::RecordRules;

/// Convert a typed sub-resource element into a record
///
/// # Contract
/// - Fields compared case-insensitively by the remote must be emitted as
///   [`Value::TextIgnoreCase`](crate::Value::TextIgnoreCase)
/// - Set-valued fields must be emitted in a stable order
pub trait ToRecord {
    /// Build the record
    fn to_record(&self) -> Record;

    /// Constraints checked before reconciliation
    fn rules() -> RecordRules
    where
        Self: Sized,
    {
        RecordRules::none()
    }
}

/// Rebuild a typed sub-resource element from a record
pub trait FromRecord: Sized {
    /// Parse the record
    ///
    /// # Errors
    /// Returns error if a required field is missing or has the wrong type
    fn from_record(record: &Record) -> Result<Self, ConversionError>;
}

impl ToRecord for Record {
    fn to_record(&self) -> Record {
        self.clone()
    }
}

impl FromRecord for Record {
    fn from_record(record: &Record) -> Result<Self, ConversionError> {
        Ok(record.clone())
    }
}

/// Errors from [`FromRecord`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// Field absent or null
    #[error("missing field: {0}")]
    MissingField(String),

    /// Field present with an unexpected type
    #[error("field {field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Expected type name
        expected: &'static str,
        /// Actual type name
        found: &'static str,
    },

    /// Field holds a value outside the allowed domain
    #[error("field {field}: invalid value {value}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Offending value
        value: String,
    },
}
