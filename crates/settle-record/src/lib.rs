//! Settle Record System
//!
//! Content-identified records and the set differ used by the
//! reconciliation engine.
//!
//! # Core Concepts
//!
//! - [`Record`]: One element of a declarative collection, no server ID
//! - [`RecordIdentity`]: 32-byte Blake3 digest of a record's canonical form
//! - [`RecordSet`]: Records keyed by identity, in declaration order
//! - [`Operation`]: `Add` or `Remove`, each carrying a full record
//! - [`diff`]: Minimal edit set between two record sets
//! - [`ToRecord`] / [`FromRecord`]: Per-resource translation capability
//!
//! # Example
//!
//! ```rust
//! use settle_record::{diff, Record, RecordSet, Value};
//!
//! let a = Record::new().with("data", Value::text_ignore_case("User-Agent"));
//! let b = Record::new().with("data", Value::text_ignore_case("referer"));
//!
//! let previous = RecordSet::from_records([a.clone()]);
//! let desired = RecordSet::from_records([b]);
//!
//! let d = diff(&previous, &desired);
//! assert_eq!(d.removes.len(), 1);
//! assert_eq!(d.adds.len(), 1);
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

// Core modules
mod convert;
mod diff;
mod identity;
mod operation;
mod record;
mod rules;
mod set;
mod value;

// Re-exports
pub use convert::{ConversionError, FromRecord, ToRecord};
pub use diff::{diff, Diff};
pub use identity::{IdentityError, RecordIdentity};
pub use operation::{Operation, OperationKind};
pub use record::Record;
pub use rules::{Constraint, RecordRules, ValidationError};
pub use set::{Desired, RecordSet};
pub use value::Value;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tuple {
        data: String,
        kind: String,
    }

    impl ToRecord for Tuple {
        fn to_record(&self) -> Record {
            Record::new()
                .with("data", Value::text_ignore_case(&self.data))
                .with("type", self.kind.as_str())
        }

        fn rules() -> RecordRules {
            RecordRules::none().required("type")
        }
    }

    impl FromRecord for Tuple {
        fn from_record(record: &Record) -> Result<Self, ConversionError> {
            Ok(Self {
                data: record.text("data")?.to_lowercase(),
                kind: record.text("type")?.to_string(),
            })
        }
    }

    #[test]
    fn typed_items_through_diff() {
        let old = [Tuple {
            data: "Host".into(),
            kind: "HEADER".into(),
        }];
        let new = [Tuple {
            data: "host".into(),
            kind: "HEADER".into(),
        }];

        let previous = RecordSet::from_items(&old).unwrap();
        let desired = RecordSet::from_items(&new).unwrap();
        assert!(diff(&previous, &desired).is_empty());
    }

    #[test]
    fn typed_items_validated() {
        let bad = [Tuple {
            data: "x".into(),
            kind: String::new(),
        }];
        assert!(RecordSet::from_items(&bad).is_err());
    }

    #[test]
    fn record_round_trip_through_typed() {
        let t = Tuple {
            data: "host".into(),
            kind: "HEADER".into(),
        };
        assert_eq!(Tuple::from_record(&t.to_record()).unwrap(), t);
    }
}
