//! Set differ
//!
//! Computes the minimal add/remove edit set between the previously applied
//! collection and the desired one, using record identity for equality.

use crate::operation::Operation;
use crate::set::RecordSet;
use serde::Serialize;

/// Edit set between two record sets
///
/// Removes carry the *previous* record's full fields; adds carry the
/// desired record. Application order is left to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    /// `Remove` operations, in previous-set declaration order
    pub removes: Vec<Operation>,
    /// `Add` operations, in desired-set declaration order
    pub adds: Vec<Operation>,
}

impl Diff {
    /// Whether no operation is needed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.adds.is_empty()
    }

    /// Total number of operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.removes.len() + self.adds.len()
    }

    /// All operations, removes before adds
    #[must_use]
    pub fn into_operations(self) -> Vec<Operation> {
        let mut ops = self.removes;
        ops.extend(self.adds);
        ops
    }

    /// The set reached by applying removes then adds to `previous`
    #[must_use]
    pub fn apply_to(&self, previous: &RecordSet) -> RecordSet {
        let mut result = previous.clone();
        for op in &self.removes {
            result.remove(&op.identity());
        }
        for op in &self.adds {
            result.insert(op.record().clone());
        }
        result
    }
}

/// Diff `previous` against `desired`
///
/// # Algorithm
/// 1. Every previous record with an identity match in desired is unchanged
///    and is taken out of the working copy of desired
/// 2. Every other previous record becomes a `Remove`
/// 3. Whatever remains in the working copy becomes an `Add`
#[must_use]
pub fn diff(previous: &RecordSet, desired: &RecordSet) -> Diff {
    let mut remaining = desired.clone();
    let mut removes = Vec::new();

    for (id, record) in previous.iter() {
        if remaining.remove(id).is_none() {
            removes.push(Operation::Remove(record.clone()));
        }
    }

    let adds = remaining.into_iter().map(Operation::Add).collect();

    Diff { removes, adds }
}
