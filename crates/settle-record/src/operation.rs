//! Mutation operations on a remote collection
//!
//! [`Operation`] is a sum type: an add or a remove, each carrying a full copy
//! of the record. Remote APIs of this style delete by restating content, so
//! removes keep every field of the previously-applied record.

use crate::identity::RecordIdentity;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A single add or remove of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "record", rename_all = "snake_case")]
pub enum Operation {
    /// Insert the record into the remote collection
    Add(Record),
    /// Delete the record from the remote collection
    Remove(Record),
}

/// Operation kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert
    Add,
    /// Delete
    Remove,
}

impl Operation {
    /// The record this operation carries
    #[inline]
    #[must_use]
    pub fn record(&self) -> &Record {
        match self {
            Self::Add(r) | Self::Remove(r) => r,
        }
    }

    /// Consume into the carried record
    #[inline]
    #[must_use]
    pub fn into_record(self) -> Record {
        match self {
            Self::Add(r) | Self::Remove(r) => r,
        }
    }

    /// Identity of the carried record
    #[inline]
    #[must_use]
    pub fn identity(&self) -> RecordIdentity {
        self.record().identity()
    }

    /// Operation kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Add(_) => OperationKind::Add,
            Self::Remove(_) => OperationKind::Remove,
        }
    }

    /// Whether this is an add
    #[inline]
    #[must_use]
    pub fn is_add(&self) -> bool {
        matches!(self, Self::Add(_))
    }

    /// Whether this is a remove
    #[inline]
    #[must_use]
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove(_))
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.record())
    }
}
