//! Identity-keyed record sets and desired state
//!
//! [`RecordSet`] holds records keyed by [`RecordIdentity`], preserving the
//! order in which they were declared. [`Desired`] distinguishes "no change
//! requested" from an explicit (possibly empty) collection.

use crate::convert::ToRecord;
use crate::identity::RecordIdentity;
use crate::record::Record;
use crate::rules::{RecordRules, ValidationError};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Records keyed by content identity
///
/// # Invariants
/// - Identities are unique; inserting an identity-equal record is a no-op
/// - Iteration follows first-declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: IndexMap<RecordIdentity, Record>,
}

impl RecordSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build set from records without validation
    ///
    /// Identity-equal duplicates collapse to the first occurrence.
    #[must_use]
    pub fn from_records<I: IntoIterator<Item = Record>>(records: I) -> Self {
        let mut set = Self::new();
        for record in records {
            set.insert(record);
        }
        set
    }

    /// Build set from records, checking each against `rules`
    ///
    /// # Errors
    /// Returns the first [`ValidationError`]; no partial set is produced
    pub fn try_from_records<I>(records: I, rules: &RecordRules) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut set = Self::new();
        for record in records {
            rules.check(&record)?;
            set.insert(record);
        }
        Ok(set)
    }

    /// Build set from typed items using their [`ToRecord`] translation and rules
    ///
    /// # Errors
    /// Returns the first [`ValidationError`]
    pub fn from_items<'a, T, I>(items: I) -> Result<Self, ValidationError>
    where
        T: ToRecord + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let rules = T::rules();
        Self::try_from_records(items.into_iter().map(ToRecord::to_record), &rules)
    }

    /// Insert a record; returns `false` if an identity-equal record exists
    pub fn insert(&mut self, record: Record) -> bool {
        let id = record.identity();
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(id, record);
        true
    }

    /// Remove by identity, preserving the order of the remaining records
    pub fn remove(&mut self, id: &RecordIdentity) -> Option<Record> {
        self.records.shift_remove(id)
    }

    /// Whether a record with this identity exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &RecordIdentity) -> bool {
        self.records.contains_key(id)
    }

    /// Whether an identity-equal record exists
    #[inline]
    #[must_use]
    pub fn contains_record(&self, record: &Record) -> bool {
        self.contains(&record.identity())
    }

    /// Look up by identity
    #[inline]
    #[must_use]
    pub fn get(&self, id: &RecordIdentity) -> Option<&Record> {
        self.records.get(id)
    }

    /// Number of records
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate `(identity, record)` in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&RecordIdentity, &Record)> {
        self.records.iter()
    }

    /// Iterate records in declaration order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Iterate identities in declaration order
    pub fn identities(&self) -> impl Iterator<Item = &RecordIdentity> {
        self.records.keys()
    }

    /// Consume into records in declaration order
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }

    /// Whether both sets contain exactly the same identities
    #[must_use]
    pub fn identity_equal(&self, other: &Self) -> bool {
        self.len() == other.len() && self.identities().all(|id| other.contains(id))
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = indexmap::map::IntoValues<RecordIdentity, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values()
    }
}

// Serialized as a plain list of records; identities are recomputed on load.
impl Serialize for RecordSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records.values())
    }
}

impl<'de> Deserialize<'de> for RecordSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<Record>::deserialize(deserializer)?;
        Ok(Self::from_records(records))
    }
}

/// Desired state of a collection
///
/// `Records(RecordSet::new())` is an explicit empty collection and differs
/// from `Unchanged`: some remote APIs need the empty collection stated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Desired {
    /// No change requested; reconciliation issues nothing
    #[default]
    Unchanged,
    /// Move the remote collection to exactly these records
    Records(RecordSet),
}

impl Desired {
    /// Explicit empty collection
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::Records(RecordSet::new())
    }

    /// Whether a collection was stated
    #[inline]
    #[must_use]
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Records(_))
    }

    /// The stated collection, if any
    #[inline]
    #[must_use]
    pub fn records(&self) -> Option<&RecordSet> {
        match self {
            Self::Unchanged => None,
            Self::Records(set) => Some(set),
        }
    }
}

impl From<RecordSet> for Desired {
    fn from(set: RecordSet) -> Self {
        Self::Records(set)
    }
}
