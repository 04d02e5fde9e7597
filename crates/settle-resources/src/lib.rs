//! Settle Resource Translations
//!
//! [`ToRecord`](settle_record::ToRecord) / [`FromRecord`](settle_record::FromRecord)
//! implementations for sub-resources that remote APIs hold without IDs:
//!
//! - [`SqlInjectionMatchTuple`]: match set tuples, header/argument names
//!   compared case-insensitively
//! - [`ExperimentTarget`] / [`ExperimentAction`]: experiment template blocks,
//!   with `resource_arns` and `resource_tag` mutually exclusive

#![warn(unreachable_pub)]
#![warn(missing_docs)]

mod experiment;
mod sql_injection;

pub use experiment::{ExperimentAction, ExperimentTarget, SelectionMode, TargetFilter};
pub use sql_injection::{
    updates_from_operations, ChangeAction, FieldToMatch, MatchSetUpdate, SqlInjectionMatchTuple,
};

use settle_record::{ConversionError, Record};

/// Required nested block stored as a map
fn nested(record: &Record, field: &str) -> Result<Record, ConversionError> {
    let value = record
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ConversionError::MissingField(field.to_string()))?;
    value
        .as_map()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .ok_or_else(|| ConversionError::TypeMismatch {
            field: field.to_string(),
            expected: "map",
            found: value.type_name(),
        })
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
